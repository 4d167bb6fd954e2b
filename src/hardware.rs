//! Hardware probing and the minimum-RAM gate.

use std::fmt;

use colored::*;
use serde::Serialize;
use sysinfo::System;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{Result, SetupError};
use crate::tier::{classify_tier, get_usable_ram};

/// Below this the tool refuses to set anything up.
pub const MIN_RAM_GB: f64 = 16.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChipVariant {
    Base,
    Pro,
    Max,
    Ultra,
}

/// Apple Silicon generation and tier, e.g. `M3 Max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppleChip {
    pub generation: u8,
    pub variant: ChipVariant,
}

impl AppleChip {
    /// Parse a chip name out of a CPU brand string such as `"Apple M3 Max"`.
    pub fn parse(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let start = lower.find("apple m")? + "apple m".len();
        let rest = &lower[start..];

        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let generation: u8 = digits.parse().ok()?;
        if !(1..=4).contains(&generation) {
            return None;
        }

        let suffix = rest[digits.len()..].split_whitespace().next().unwrap_or("");
        let variant = match suffix {
            "pro" => ChipVariant::Pro,
            "max" => ChipVariant::Max,
            "ultra" => ChipVariant::Ultra,
            _ => ChipVariant::Base,
        };

        Some(AppleChip {
            generation,
            variant,
        })
    }

    /// Pro/Max/Ultra of the two most recent generations.
    pub fn is_high_end(&self) -> bool {
        self.generation >= 3 && self.variant != ChipVariant::Base
    }
}

impl fmt::Display for AppleChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            ChipVariant::Base => write!(f, "M{}", self.generation),
            ChipVariant::Pro => write!(f, "M{} Pro", self.generation),
            ChipVariant::Max => write!(f, "M{} Max", self.generation),
            ChipVariant::Ultra => write!(f, "M{} Ultra", self.generation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareInfo {
    /// Total RAM in whole GB.
    pub ram_gb: f64,
    pub cpu_brand: String,
    pub arch: String,
    pub os: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub apple_chip: Option<AppleChip>,
}

impl HardwareInfo {
    /// Probe the machine. Sub-probe failures leave defaults; this never fails.
    pub fn probe() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let ram_gb = (sys.total_memory() as f64 / BYTES_PER_GB).round();

        let logical_cores = sys.cpus().len();
        let physical_cores = sys.physical_core_count().unwrap_or(logical_cores);
        let mut cpu_brand = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty())
            .unwrap_or_else(|| "Unknown CPU".to_string());

        let arch = std::env::consts::ARCH.to_string();
        let os = std::env::consts::OS.to_string();

        let mut apple_chip = AppleChip::parse(&cpu_brand);
        if apple_chip.is_none() && os == "macos" && arch == "aarch64" {
            if let Some(brand) = Self::sysctl_brand_string() {
                apple_chip = AppleChip::parse(&brand);
                cpu_brand = brand;
            }
        }

        debug!(
            ram_gb,
            %cpu_brand,
            physical_cores,
            logical_cores,
            chip = ?apple_chip,
            "probed hardware"
        );

        HardwareInfo {
            ram_gb,
            cpu_brand,
            arch,
            os,
            physical_cores,
            logical_cores,
            apple_chip,
        }
    }

    /// macOS reports the chip name through sysctl when sysinfo does not.
    fn sysctl_brand_string() -> Option<String> {
        let output = std::process::Command::new("sysctl")
            .arg("-n")
            .arg("machdep.cpu.brand_string")
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let text = String::from_utf8(output.stdout).ok()?;
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    pub fn is_apple_silicon(&self) -> bool {
        self.apple_chip.is_some()
    }

    pub fn meets_minimum(&self) -> bool {
        self.ram_gb >= MIN_RAM_GB
    }

    pub fn display(&self, backend: Backend) {
        let tier = classify_tier(self, backend);
        let usable = get_usable_ram(self, backend);

        println!("\n{}", "=== Hardware ===".bold().cyan());
        println!(
            "CPU: {} ({} cores / {} threads)",
            self.cpu_brand, self.physical_cores, self.logical_cores
        );
        println!("Platform: {} ({})", self.os, self.arch);
        if let Some(chip) = &self.apple_chip {
            println!("Apple Silicon: {}", chip);
        }
        println!("Total RAM: {:.0} GB", self.ram_gb);
        println!(
            "Tier: {} ({})",
            tier.label().bold(),
            tier.description()
        );
        println!("Usable for models on {}: {:.1} GB", backend, usable);
        println!();
    }
}

/// Probe the machine and enforce the minimum-RAM gate.
pub fn detect_hardware() -> Result<HardwareInfo> {
    let hw = HardwareInfo::probe();
    if !hw.meets_minimum() {
        return Err(SetupError::InsufficientRam {
            found_gb: hw.ram_gb,
            required_gb: MIN_RAM_GB,
        });
    }
    Ok(hw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apple_chip_variants() {
        assert_eq!(
            AppleChip::parse("Apple M3 Max"),
            Some(AppleChip {
                generation: 3,
                variant: ChipVariant::Max
            })
        );
        assert_eq!(
            AppleChip::parse("Apple M1"),
            Some(AppleChip {
                generation: 1,
                variant: ChipVariant::Base
            })
        );
        assert_eq!(
            AppleChip::parse("Chipset Model: Apple M4 Pro (14-core)"),
            Some(AppleChip {
                generation: 4,
                variant: ChipVariant::Pro
            })
        );
        assert_eq!(
            AppleChip::parse("apple m2 ultra").map(|c| c.variant),
            Some(ChipVariant::Ultra)
        );
    }

    #[test]
    fn test_parse_rejects_non_apple() {
        assert_eq!(AppleChip::parse("Intel(R) Core(TM) i7-9750H"), None);
        assert_eq!(AppleChip::parse("AMD Ryzen 9 7950X"), None);
        assert_eq!(AppleChip::parse("Apple M9"), None);
        assert_eq!(AppleChip::parse("Apple Mx"), None);
    }

    #[test]
    fn test_high_end() {
        let chip = |generation, variant| AppleChip {
            generation,
            variant,
        };
        assert!(chip(3, ChipVariant::Max).is_high_end());
        assert!(chip(4, ChipVariant::Pro).is_high_end());
        assert!(!chip(4, ChipVariant::Base).is_high_end());
        assert!(!chip(2, ChipVariant::Ultra).is_high_end());
    }

    #[test]
    fn test_chip_display() {
        let chip = AppleChip {
            generation: 3,
            variant: ChipVariant::Max,
        };
        assert_eq!(chip.to_string(), "M3 Max");
    }

    #[test]
    fn test_probe_is_stable() {
        let first = HardwareInfo::probe();
        let second = HardwareInfo::probe();
        for backend in Backend::ALL {
            assert_eq!(classify_tier(&first, backend), classify_tier(&second, backend));
            assert_eq!(get_usable_ram(&first, backend), get_usable_ram(&second, backend));
        }
    }
}
