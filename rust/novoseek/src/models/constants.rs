pub const MASS_PROTON: f64 = 1.007276466621;
pub const MASS_WATER: f64 = 18.0105646863;
/// Mass difference between 13C and 12C, one unit of isotope error.
pub const ISOTOPE_UNIT_MASS: f64 = 1.00335483;

pub const PAD_TOKEN: &str = "[PAD]";
pub const SOS_TOKEN: &str = "[SOS]";
pub const EOS_TOKEN: &str = "[EOS]";

pub type TokenId = usize;

pub const PAD_ID: TokenId = 0;
pub const SOS_ID: TokenId = 1;
pub const EOS_ID: TokenId = 2;
pub const NUM_SPECIAL_TOKENS: usize = 3;

/// Absolute tolerance in daltons for a ppm tolerance around `mass`.
pub fn ppm_to_da(mass: f64, ppm: f64) -> f64 {
    mass.abs() * ppm / 1e6
}

pub fn mass_error_ppm(observed: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        return f64::INFINITY;
    }
    (observed - reference) / reference * 1e6
}
