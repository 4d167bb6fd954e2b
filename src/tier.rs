//! Hardware tiers and the RAM left over for models.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::hardware::{AppleChip, HardwareInfo};

/// RAM-based hardware bucket. Ordered so that `C < B < A < S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HardwareTier {
    C,
    B,
    A,
    S,
}

impl HardwareTier {
    pub const ALL: [HardwareTier; 4] = [
        HardwareTier::S,
        HardwareTier::A,
        HardwareTier::B,
        HardwareTier::C,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HardwareTier::S => "S",
            HardwareTier::A => "A",
            HardwareTier::B => "B",
            HardwareTier::C => "C",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HardwareTier::S => "Workstation: large coding models with long context",
            HardwareTier::A => "High-end: mid-size coding models",
            HardwareTier::B => "Mainstream: 7B-14B coding models",
            HardwareTier::C => "Entry: small coding models, short context",
        }
    }

    /// Upper bound on the context length written into IDE configs.
    pub fn context_cap(&self) -> u32 {
        match self {
            HardwareTier::S => 32_768,
            HardwareTier::A => 16_384,
            HardwareTier::B => 8_192,
            HardwareTier::C => 4_096,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Some(HardwareTier::S),
            "A" => Some(HardwareTier::A),
            "B" => Some(HardwareTier::B),
            "C" => Some(HardwareTier::C),
            _ => None,
        }
    }
}

impl fmt::Display for HardwareTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How much RAM is held back for the OS and other applications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reservation {
    /// Fraction of total RAM reserved, per tier.
    Percent { s: f64, a: f64, b: f64, c: f64 },
    /// Fixed GB reserved regardless of tier.
    Flat(f64),
}

/// Threshold ladder plus reservation rule for one backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierPolicy {
    pub s_min_gb: f64,
    pub a_min_gb: f64,
    pub b_min_gb: f64,
    /// High-end Apple chips with at least this much RAM are bumped to S.
    pub promote_high_end_from: Option<f64>,
    pub reservation: Reservation,
}

const DEFAULT_RESERVATION: Reservation = Reservation::Percent {
    s: 0.30,
    a: 0.30,
    b: 0.35,
    c: 0.40,
};

impl TierPolicy {
    pub const DOCKER: TierPolicy = TierPolicy {
        s_min_gb: 49.0,
        a_min_gb: 33.0,
        b_min_gb: 17.0,
        promote_high_end_from: Some(40.0),
        reservation: DEFAULT_RESERVATION,
    };

    pub const OLLAMA: TierPolicy = TierPolicy {
        s_min_gb: 48.0,
        a_min_gb: 32.0,
        b_min_gb: 24.0,
        promote_high_end_from: None,
        reservation: DEFAULT_RESERVATION,
    };

    pub const LLAMACPP: TierPolicy = TierPolicy {
        s_min_gb: 64.0,
        a_min_gb: 32.0,
        b_min_gb: 24.0,
        promote_high_end_from: None,
        reservation: Reservation::Flat(8.0),
    };

    pub fn classify(&self, ram_gb: f64, chip: Option<&AppleChip>) -> HardwareTier {
        if let (Some(from), Some(chip)) = (self.promote_high_end_from, chip) {
            if chip.is_high_end() && ram_gb >= from {
                return HardwareTier::S;
            }
        }

        if ram_gb >= self.s_min_gb {
            HardwareTier::S
        } else if ram_gb >= self.a_min_gb {
            HardwareTier::A
        } else if ram_gb >= self.b_min_gb {
            HardwareTier::B
        } else {
            HardwareTier::C
        }
    }

    /// Fraction of RAM held back for `tier`, if this policy is percentage based.
    pub fn reservation_fraction(&self, tier: HardwareTier) -> Option<f64> {
        match self.reservation {
            Reservation::Percent { s, a, b, c } => Some(match tier {
                HardwareTier::S => s,
                HardwareTier::A => a,
                HardwareTier::B => b,
                HardwareTier::C => c,
            }),
            Reservation::Flat(_) => None,
        }
    }

    /// RAM budget for models. Always within `[0, ram_gb]`.
    pub fn usable_ram(&self, ram_gb: f64, tier: HardwareTier) -> f64 {
        let ram_gb = ram_gb.max(0.0);
        let usable = match self.reservation {
            Reservation::Percent { .. } => {
                let fraction = self.reservation_fraction(tier).unwrap_or(0.0);
                ram_gb * (1.0 - fraction)
            }
            Reservation::Flat(reserved) => ram_gb - reserved,
        };
        usable.clamp(0.0, ram_gb)
    }
}

pub fn classify_tier(hw: &HardwareInfo, backend: Backend) -> HardwareTier {
    backend
        .tier_policy()
        .classify(hw.ram_gb, hw.apple_chip.as_ref())
}

pub fn get_usable_ram(hw: &HardwareInfo, backend: Backend) -> f64 {
    let policy = backend.tier_policy();
    let tier = policy.classify(hw.ram_gb, hw.apple_chip.as_ref());
    policy.usable_ram(hw.ram_gb, tier)
}
