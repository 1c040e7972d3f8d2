//! Game mode enumeration (§ GLOSSARY: "Mode").

use serde::{Deserialize, Serialize};

/// Canonical game-type mapping transmitted as an integer code over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Battle,
    Treasure,
    Ctf,
    Race,
    Coop,
    Roasttag,
    Lrs,
    Xlrs,
    Pestilence,
    Teambattle,
    Jailbreak,
    Deathctf,
    Flagrun,
    Tlrs,
    Domination,
    Headhunters,
    Unknown,
}

impl Mode {
    /// Decodes the 5-bit mode code carried in bits 1-5 of the hello flag byte (§4.6).
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Mode::Battle,
            2 => Mode::Treasure,
            3 => Mode::Ctf,
            4 => Mode::Race,
            5 => Mode::Coop,
            6 => Mode::Roasttag,
            7 => Mode::Lrs,
            8 => Mode::Xlrs,
            9 => Mode::Pestilence,
            10 => Mode::Teambattle,
            11 => Mode::Jailbreak,
            12 => Mode::Deathctf,
            13 => Mode::Flagrun,
            14 => Mode::Tlrs,
            15 => Mode::Domination,
            16 => Mode::Headhunters,
            _ => Mode::Unknown,
        }
    }

    /// The string persisted in the `servers.mode` column and emitted on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Battle => "battle",
            Mode::Treasure => "treasure",
            Mode::Ctf => "ctf",
            Mode::Race => "race",
            Mode::Coop => "coop",
            Mode::Roasttag => "roasttag",
            Mode::Lrs => "lrs",
            Mode::Xlrs => "xlrs",
            Mode::Pestilence => "pestilence",
            Mode::Teambattle => "teambattle",
            Mode::Jailbreak => "jailbreak",
            Mode::Deathctf => "deathctf",
            Mode::Flagrun => "flagrun",
            Mode::Tlrs => "tlrs",
            Mode::Domination => "domination",
            Mode::Headhunters => "headhunters",
            Mode::Unknown => "unknown",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "battle" => Mode::Battle,
            "treasure" => Mode::Treasure,
            "ctf" => Mode::Ctf,
            "race" => Mode::Race,
            "coop" => Mode::Coop,
            "roasttag" => Mode::Roasttag,
            "lrs" => Mode::Lrs,
            "xlrs" => Mode::Xlrs,
            "pestilence" => Mode::Pestilence,
            "teambattle" => Mode::Teambattle,
            "jailbreak" => Mode::Jailbreak,
            "deathctf" => Mode::Deathctf,
            "flagrun" => Mode::Flagrun,
            "tlrs" => Mode::Tlrs,
            "domination" => Mode::Domination,
            "headhunters" => Mode::Headhunters,
            _ => Mode::Unknown,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_codes() {
        assert_eq!(Mode::from_code(3), Mode::Ctf);
        assert_eq!(Mode::from_code(16), Mode::Headhunters);
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(Mode::from_code(0), Mode::Unknown);
        assert_eq!(Mode::from_code(200), Mode::Unknown);
    }

    #[test]
    fn round_trips_through_str() {
        for code in 1..=16u8 {
            let m = Mode::from_code(code);
            assert_eq!(Mode::from_str_loose(m.as_str()), m);
        }
    }
}
