#![forbid(unsafe_code)]

use std::env;
use std::str::FromStr;

use tracing::warn;

use crate::config::{Config, Distribution, FaultProfile};

const ENV_DEBUG: &str = "SOCKET_RETARDER_DEBUG";
const ENV_DNS: &str = "SOCKET_RETARDER_DNS";
const ENV_DISTRIBUTION: &str = "SOCKET_RETARDER_DISTRIBUTION";
const ENV_NORMAL_MEAN: &str = "SOCKET_RETARDER_NORMALDIST_MEAN";
const ENV_NORMAL_VARIANCE: &str = "SOCKET_RETARDER_NORMALDIST_VARIANCE";
const ENV_UNIFORM_A: &str = "SOCKET_RETARDER_UNIFORMDIST_A";
const ENV_UNIFORM_B: &str = "SOCKET_RETARDER_UNIFORMDIST_B";
const ENV_DROP: &str = "SOCKET_RETARDER_UDP_DROP_PROBABILITY";
const ENV_DAMAGE: &str = "SOCKET_RETARDER_UDP_DAMAGE_PROBABILITY";
const ENV_DUPLICATE: &str = "SOCKET_RETARDER_UDP_DUPLICATE_PROBABILITY";

/// Read configuration from `SOCKET_RETARDER_*` variables.
///
/// Never fails: the injector must not take the host application down over a
/// typo'd variable. Unparseable or out-of-range values fall back to their
/// defaults with a warning.
pub fn load_from_env() -> Config {
    let debug: u8 = parse_var(ENV_DEBUG, 0);
    let dns_retard = env::var(ENV_DNS).map(|v| v == "1").unwrap_or(false);

    let distribution = match env::var(ENV_DISTRIBUTION).as_deref() {
        Ok("uniform") => {
            let lower_ms = clamp_ms(ENV_UNIFORM_A, parse_var(ENV_UNIFORM_A, 500));
            let upper_ms = clamp_ms(ENV_UNIFORM_B, parse_var(ENV_UNIFORM_B, 1500));
            if upper_ms < lower_ms {
                warn!(lower_ms, upper_ms, "uniform bounds reversed, swapping");
                Distribution::Uniform { lower_ms: upper_ms, upper_ms: lower_ms }
            } else {
                Distribution::Uniform { lower_ms, upper_ms }
            }
        }
        _ => Distribution::Normal {
            mean_ms: clamp_ms(ENV_NORMAL_MEAN, parse_var(ENV_NORMAL_MEAN, 1000)),
            variance_ms: clamp_ms(ENV_NORMAL_VARIANCE, parse_var(ENV_NORMAL_VARIANCE, 500)),
        },
    };

    let faults = FaultProfile {
        drop: probability(ENV_DROP),
        damage: probability(ENV_DAMAGE),
        duplicate: probability(ENV_DUPLICATE),
    };

    Config { debug, dns_retard, distribution, faults }
}

fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn clamp_ms(name: &str, ms: i64) -> i64 {
    if ms < 0 {
        warn!(var = name, ms, "negative duration, clamping to 0");
        0
    } else {
        ms
    }
}

fn probability(name: &str) -> f64 {
    let p: f64 = parse_var(name, 0.0);
    if !(0.0..=1.0).contains(&p) {
        warn!(var = name, p, "probability outside [0,1], clamping");
        p.clamp(0.0, 1.0)
    } else {
        p
    }
}
