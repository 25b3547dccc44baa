/// Fuel characteristics of the aircraft flying the route
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftParameters {
    /// Tank capacity
    pub capacity: f64,
    /// Fuel on board at the start node. `None` means a full tank
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub initial_fuel: Option<f64>,
    /// Minimum fuel that must remain on board at all times
    #[cfg_attr(feature = "serde", serde(default))]
    pub reserve: f64,
    /// Fuel burned per unit of distance, used for arcs without an explicit burn
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub burn_rate: Option<f64>,
}

impl AircraftParameters {
    /// Full tank, no reserve, no burn rate
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity,
            initial_fuel: None,
            reserve: 0.0,
            burn_rate: None,
        }
    }

    pub fn with_initial_fuel(mut self, fuel: f64) -> Self {
        self.initial_fuel = Some(fuel);
        self
    }

    pub fn with_reserve(mut self, reserve: f64) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn with_burn_rate(mut self, rate: f64) -> Self {
        self.burn_rate = Some(rate);
        self
    }

    pub fn initial_fuel(&self) -> f64 {
        self.initial_fuel.unwrap_or(self.capacity)
    }

    /// Fuel needed for a leg of `distance` when no explicit burn is given
    pub fn burn_for(&self, distance: f64) -> Option<f64> {
        self.burn_rate.map(|rate| rate * distance)
    }

    /// Check the parameters are consistent with each other.
    /// Returns a description of the first problem found.
    pub fn check(&self) -> Result<(), String> {
        let finite_non_negative = |name: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(format!("{} must be finite and non-negative, got {}", name, v))
            }
        };

        finite_non_negative("capacity", self.capacity)?;
        finite_non_negative("reserve", self.reserve)?;
        finite_non_negative("initial fuel", self.initial_fuel())?;
        if let Some(rate) = self.burn_rate {
            finite_non_negative("burn rate", rate)?;
        }

        if self.capacity < self.reserve {
            return Err(format!(
                "capacity {} is below the reserve {}",
                self.capacity, self.reserve
            ));
        }
        if self.initial_fuel() > self.capacity {
            return Err(format!(
                "initial fuel {} exceeds capacity {}",
                self.initial_fuel(),
                self.capacity
            ));
        }
        Ok(())
    }
}
