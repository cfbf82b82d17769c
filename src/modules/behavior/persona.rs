use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Browsing personalities a session can adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    CasualBrowser,
    QuickScanner,
    ThoroughResearcher,
    MobileUser,
    PriceHunter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonaTraits {
    pub reading_speed: f64,
    pub scroll_speed: f64,
    pub attention_span: f64,
    pub bounce_rate: f64,
    pub pages_per_session: (u32, u32),
    /// Relative frequency among sessions.
    pub weight: f64,
}

impl Persona {
    pub const ALL: [Persona; 5] = [
        Persona::CasualBrowser,
        Persona::QuickScanner,
        Persona::ThoroughResearcher,
        Persona::MobileUser,
        Persona::PriceHunter,
    ];

    pub fn traits(self) -> PersonaTraits {
        match self {
            Persona::CasualBrowser => PersonaTraits {
                reading_speed: 1.0,
                scroll_speed: 1.0,
                attention_span: 1.0,
                bounce_rate: 0.50,
                pages_per_session: (3, 8),
                weight: 0.35,
            },
            Persona::QuickScanner => PersonaTraits {
                reading_speed: 1.8,
                scroll_speed: 1.5,
                attention_span: 0.6,
                bounce_rate: 0.35,
                pages_per_session: (2, 5),
                weight: 0.25,
            },
            Persona::ThoroughResearcher => PersonaTraits {
                reading_speed: 0.7,
                scroll_speed: 0.6,
                attention_span: 2.0,
                bounce_rate: 0.15,
                pages_per_session: (8, 20),
                weight: 0.05,
            },
            Persona::MobileUser => PersonaTraits {
                reading_speed: 0.85,
                scroll_speed: 1.3,
                attention_span: 0.5,
                bounce_rate: 0.55,
                pages_per_session: (2, 6),
                weight: 0.20,
            },
            Persona::PriceHunter => PersonaTraits {
                reading_speed: 2.0,
                scroll_speed: 1.8,
                attention_span: 0.4,
                bounce_rate: 0.40,
                pages_per_session: (5, 12),
                weight: 0.15,
            },
        }
    }

    /// Weighted draw; casual browsers are the most common.
    pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> Persona {
        let total: f64 = Self::ALL.iter().map(|p| p.traits().weight).sum();
        let mut roll = rng.gen_range(0.0..total);
        for persona in Self::ALL {
            let weight = persona.traits().weight;
            if roll < weight {
                return persona;
            }
            roll -= weight;
        }
        Persona::CasualBrowser
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Persona::CasualBrowser => "casual_browser",
            Persona::QuickScanner => "quick_scanner",
            Persona::ThoroughResearcher => "thorough_researcher",
            Persona::MobileUser => "mobile_user",
            Persona::PriceHunter => "price_hunter",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
