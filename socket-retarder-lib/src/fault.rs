#![forbid(unsafe_code)]

use rand::{rng, Rng};

use crate::config::FaultProfile;

/// Rolls independent Bernoulli outcomes for the three UDP fault classes.
#[derive(Debug, Clone, Copy)]
pub struct FaultSampler {
    profile: FaultProfile,
}

impl FaultSampler {
    pub fn new(profile: FaultProfile) -> Self {
        Self { profile }
    }

    pub fn roll_drop(&self) -> bool {
        roll(self.profile.drop)
    }

    pub fn roll_damage(&self) -> bool {
        roll(self.profile.damage)
    }

    pub fn roll_duplicate(&self) -> bool {
        roll(self.profile.duplicate)
    }

    /// Corrupt `floor(p_damage * len)` byte positions, drawn uniformly with
    /// replacement, by XOR with 0xFF.
    pub fn damage(&self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        let count = (self.profile.damage * buf.len() as f64) as usize;
        let mut rng = rng();
        for _ in 0..count {
            let pos = rng.random_range(0..buf.len());
            buf[pos] ^= 0xFF;
        }
    }
}

fn roll(p: f64) -> bool {
    if p <= 0.0 {
        false
    } else if p >= 1.0 {
        true
    } else {
        rng().random::<f64>() < p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(drop: f64, damage: f64, duplicate: f64) -> FaultSampler {
        FaultSampler::new(FaultProfile { drop, damage, duplicate })
    }

    #[test]
    fn zero_probabilities_never_fire() {
        let s = sampler(0.0, 0.0, 0.0);
        for _ in 0..1000 {
            assert!(!s.roll_drop());
            assert!(!s.roll_damage());
            assert!(!s.roll_duplicate());
        }
    }

    #[test]
    fn unit_probabilities_always_fire() {
        let s = sampler(1.0, 1.0, 1.0);
        for _ in 0..1000 {
            assert!(s.roll_drop());
            assert!(s.roll_damage());
            assert!(s.roll_duplicate());
        }
    }

    #[test]
    fn damage_flips_proportional_byte_count() {
        let s = sampler(0.0, 0.5, 0.0);
        let original = vec![0u8; 64];
        let mut buf = original.clone();
        s.damage(&mut buf);
        let flipped = buf.iter().filter(|&&b| b != 0).count();
        // 32 draws with replacement; collisions un-flip, so at most 32 and
        // certainly more than none.
        assert!(flipped > 0 && flipped <= 32, "{flipped} bytes flipped");
    }

    #[test]
    fn damage_on_empty_payload_is_noop() {
        let s = sampler(0.0, 1.0, 0.0);
        let mut buf: Vec<u8> = Vec::new();
        s.damage(&mut buf);
        assert!(buf.is_empty());
    }

    #[test]
    fn small_damage_probability_flips_nothing_on_short_payload() {
        // floor(0.1 * 4) == 0 positions
        let s = sampler(0.0, 0.1, 0.0);
        let mut buf = vec![0xAAu8; 4];
        s.damage(&mut buf);
        assert_eq!(buf, vec![0xAAu8; 4]);
    }
}
