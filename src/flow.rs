//! Freestream state derived from the mission and environment.

pub const GAMMA: f64 = 1.4;
pub const CV: f64 = 717.645;
/// Sutherland constant for air, K
pub const SUTHERLAND: f64 = 110.4;
pub const MU_REF: f64 = 1.716e-5;
pub const T_REF: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freestream {
    pub mach: f64,
    pub pressure: f64,
    pub temperature: f64,
    pub density: f64,
    pub sound_speed: f64,
    pub velocity: f64,
    pub viscosity: f64,
    pub reynolds: f64,
    pub reynolds_length: f64,
    pub pstag: f64,
    pub tstag: f64,
}

impl Freestream {
    pub fn new(mach: f64, pressure: f64, temperature: f64, length: f64) -> Self {
        let viscosity = sutherland(temperature);
        let density = pressure / ((GAMMA - 1.0) * CV * temperature);
        let sound_speed = (GAMMA * pressure / density).sqrt();
        let velocity = mach * sound_speed;
        let reynolds = density * velocity * length / viscosity;

        Self {
            mach,
            pressure,
            temperature,
            density,
            sound_speed,
            velocity,
            viscosity,
            reynolds,
            reynolds_length: length,
            pstag: pressure + 0.5 * density * velocity * velocity,
            tstag: temperature * (1.0 + 0.5 * (GAMMA - 1.0) * mach * mach),
        }
    }
}

/// Dynamic viscosity of air, Pa·s
pub fn sutherland(temperature: f64) -> f64 {
    MU_REF * (temperature / T_REF).powf(1.5) * (T_REF + SUTHERLAND) / (temperature + SUTHERLAND)
}
