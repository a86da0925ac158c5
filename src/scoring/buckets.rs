//! Representative values for features the claim form collects as ranges.
//!
//! The classifiers were trained on range midpoints, so free-form numeric
//! input has to be snapped back onto the midpoint its range would have
//! produced. The entries keep the order the training pipeline used; ties on
//! distance resolve to the earlier entry.

/// Vehicle prices are entered in EUR but the models were trained on USD.
pub(crate) const EUR_TO_USD: f64 = 1.0 / 0.86;

const PAST_NUMBER_OF_CLAIMS: &[f64] = &[0.0, 1.0, 3.0, 5.0];
const AGE_OF_POLICY_HOLDER: &[f64] = &[16.5, 19.0, 23.0, 28.0, 33.0, 38.0, 45.5, 58.0, 66.0];
const NUMBER_OF_SUPPLIMENTS: &[f64] = &[0.0, 1.5, 4.0, 6.0];
const VEHICLE_PRICE: &[f64] = &[24500.0, 34500.0, 49500.0, 64500.0, 15000.0, 70000.0];
const DAYS_POLICY_ACCIDENT: &[f64] = &[0.0, 4.0, 11.5, 22.5, 35.0];
const DAYS_POLICY_CLAIM: &[f64] = &[0.0, 11.5, 22.5, 35.0];
const NUMBER_OF_CARS: &[f64] = &[1.0, 2.0, 3.5, 6.5, 9.0];

/// Representative set for a bucketed-range column, `None` for plain numerics.
pub(crate) fn representatives(column: &str) -> Option<&'static [f64]> {
    match column {
        "PastNumberOfClaims" => Some(PAST_NUMBER_OF_CLAIMS),
        "AgeOfPolicyHolder" => Some(AGE_OF_POLICY_HOLDER),
        "NumberOfSuppliments" => Some(NUMBER_OF_SUPPLIMENTS),
        "VehiclePrice" => Some(VEHICLE_PRICE),
        "Days_Policy_Accident" => Some(DAYS_POLICY_ACCIDENT),
        "Days_Policy_Claim" => Some(DAYS_POLICY_CLAIM),
        "NumberOfCars" => Some(NUMBER_OF_CARS),
        _ => None,
    }
}

/// Nearest representative by absolute distance; the first minimal match in
/// the list wins on ties.
pub(crate) fn snap_to_representative(value: f64, representatives: &'static [f64]) -> f64 {
    let mut best = representatives[0];
    let mut best_distance = (value - best).abs();
    for &candidate in &representatives[1..] {
        let distance = (value - candidate).abs();
        if distance < best_distance {
            best = candidate;
            best_distance = distance;
        }
    }
    best
}
