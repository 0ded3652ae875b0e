#![forbid(unsafe_code)]

/// Delay distribution selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    /// Approximately normal, centered on `mean_ms` with spread `variance_ms`
    Normal { mean_ms: i64, variance_ms: i64 },
    /// Uniform over `[lower_ms, upper_ms)`
    Uniform { lower_ms: i64, upper_ms: i64 },
}

/// Independent fault probabilities applied to UDP datagrams
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultProfile {
    /// Probability of silently dropping a datagram
    pub drop: f64,
    /// Probability of corrupting a datagram before it is enqueued
    pub damage: f64,
    /// Probability of enqueueing the datagram a second time
    pub duplicate: f64,
}

/// Runtime configuration, read once from the environment at load time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Diagnostic verbosity, 0..3
    pub debug: u8,
    /// Also retard port-53 traffic
    pub dns_retard: bool,
    pub distribution: Distribution,
    pub faults: FaultProfile,
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::Normal { mean_ms: 1000, variance_ms: 500 }
    }
}

impl Default for FaultProfile {
    fn default() -> Self {
        FaultProfile { drop: 0.0, damage: 0.0, duplicate: 0.0 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: 0,
            dns_retard: false,
            distribution: Distribution::default(),
            faults: FaultProfile::default(),
        }
    }
}
