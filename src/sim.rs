//! Software models used when compiled without the `gpio` feature. Grounded
//! on the same random-walk-plus-noise approach used for soil moisture
//! simulation elsewhere in this codebase's lineage: an Irwin-Hall
//! approximation of Gaussian noise (sum of twelve uniforms minus six)
//! avoids pulling in a distributions crate for one noise source.

#![cfg(feature = "sim")]

fn approx_std_normal() -> f64 {
    let mut sum = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + approx_std_normal() * sigma
}

/// Mean-reverting random walk for soil moisture percentage, with a slow
/// drying drift and a step response when watering is in progress.
pub struct SoilMoistureSim {
    value: f64,
    baseline: f64,
    drying_per_tick: f64,
}

impl SoilMoistureSim {
    pub fn new(start_pct: f64) -> Self {
        Self {
            value: start_pct,
            baseline: start_pct,
            drying_per_tick: 0.15,
        }
    }

    pub fn sample(&mut self, watering: bool) -> u8 {
        if watering {
            self.value += 4.0 + gaussian(0.0, 0.5);
        } else {
            self.value -= self.drying_per_tick + gaussian(0.0, 0.1).abs();
            // gentle mean reversion toward baseline so it doesn't run away
            self.value += (self.baseline - self.value) * 0.01;
        }
        self.value = self.value.clamp(0.0, 100.0);
        self.value.round() as u8
    }
}

/// A digital sensor that mostly holds its state but occasionally flips,
/// standing in for rain/water-level contact switches.
pub struct DigitalSim {
    state: bool,
    flip_probability: f64,
}

impl DigitalSim {
    pub fn new(initial: bool, flip_probability: f64) -> Self {
        Self {
            state: initial,
            flip_probability,
        }
    }

    pub fn sample(&mut self) -> bool {
        if fastrand::f64() < self.flip_probability {
            self.state = !self.state;
        }
        self.state
    }
}

/// Diurnal air temperature/humidity model: a sinusoid over a notional
/// 24-hour cycle position (0.0..1.0) plus Gaussian jitter.
pub struct AirClimateSim {
    cycle_pos: f64,
    cycle_step: f64,
}

impl AirClimateSim {
    pub fn new(cycle_step: f64) -> Self {
        Self {
            cycle_pos: 0.25,
            cycle_step,
        }
    }

    pub fn sample(&mut self) -> (f32, u8) {
        self.cycle_pos = (self.cycle_pos + self.cycle_step) % 1.0;
        let phase = self.cycle_pos * std::f64::consts::TAU;
        let temp = 20.0 + 6.0 * phase.sin() + gaussian(0.0, 0.4);
        let humidity = 55.0 - 15.0 * phase.sin() + gaussian(0.0, 1.5);
        (temp as f32, humidity.clamp(0.0, 100.0).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soil_moisture_sim_rises_while_watering() {
        let mut sim = SoilMoistureSim::new(30.0);
        let before = sim.value;
        for _ in 0..5 {
            sim.sample(true);
        }
        assert!(sim.value > before);
    }

    #[test]
    fn soil_moisture_sim_falls_while_idle() {
        let mut sim = SoilMoistureSim::new(80.0);
        let before = sim.value;
        for _ in 0..20 {
            sim.sample(false);
        }
        assert!(sim.value < before);
    }

    #[test]
    fn soil_moisture_sim_stays_in_bounds() {
        let mut sim = SoilMoistureSim::new(50.0);
        for _ in 0..500 {
            let pct = sim.sample(fastrand::bool());
            assert!(pct <= 100);
        }
    }

    #[test]
    fn digital_sim_with_zero_flip_probability_never_changes() {
        let mut sim = DigitalSim::new(false, 0.0);
        for _ in 0..50 {
            assert!(!sim.sample());
        }
    }

    #[test]
    fn air_climate_sim_produces_plausible_ranges() {
        let mut sim = AirClimateSim::new(0.05);
        for _ in 0..20 {
            let (temp, hum) = sim.sample();
            assert!(temp > -10.0 && temp < 50.0);
            assert!(hum <= 100);
        }
    }
}
