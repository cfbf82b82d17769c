//! Browser fingerprint spoofing utilities.
//!
//! Generates complete synthetic identities (browser, canvas/WebGL/audio noise,
//! hardware traits, TLS cipher order, battery state) so every profile presents
//! a coherent client to the sites it visits.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

pub const FINGERPRINT_VERSION: &str = "2.0.0";

const CHROME_120: &str = "Chrome/120.0.0.0 Safari/537.36";
const CHROME_119: &str = "Chrome/119.0.0.0 Safari/537.36";

/// Attributes that must agree with each other for one operating system.
#[derive(Debug)]
struct PlatformTemplate {
    /// `navigator.platform`.
    platform: &'static str,
    /// Prefix of the user agent up to the browser token.
    ua_prefix: &'static str,
    viewports: &'static [(u32, u32)],
    gpus: &'static [(&'static str, &'static str)],
    concurrency: &'static [u32],
    device_memory: &'static [u32],
}

const TEMPLATES: &[PlatformTemplate] = &[
    PlatformTemplate {
        platform: "Win32",
        ua_prefix: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)",
        viewports: &[(1920, 1080), (1366, 768), (1536, 864), (2560, 1440), (1280, 720)],
        gpus: &[
            (
                "Google Inc. (NVIDIA)",
                "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 Direct3D11 vs_5_0 ps_5_0, D3D11)",
            ),
            (
                "Google Inc. (AMD)",
                "ANGLE (AMD, AMD Radeon RX 580 Direct3D11 vs_5_0 ps_5_0, D3D11)",
            ),
            (
                "Google Inc. (Intel)",
                "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)",
            ),
        ],
        concurrency: &[4, 8, 12, 16],
        device_memory: &[4, 8, 16, 32],
    },
    PlatformTemplate {
        platform: "MacIntel",
        ua_prefix: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)",
        viewports: &[(1440, 900), (1536, 960), (1680, 1050), (2560, 1440)],
        gpus: &[
            ("Google Inc. (Apple)", "ANGLE (Apple, Apple M1, OpenGL 4.1)"),
            ("Google Inc. (Apple)", "ANGLE (Apple, Apple M2, OpenGL 4.1)"),
            (
                "Google Inc. (Intel Inc.)",
                "ANGLE (Intel Inc., Intel(R) Iris(TM) Plus Graphics 655, OpenGL 4.1)",
            ),
        ],
        concurrency: &[8, 10, 12],
        device_memory: &[8, 16, 32],
    },
    PlatformTemplate {
        platform: "Linux x86_64",
        ua_prefix: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)",
        viewports: &[(1920, 1080), (1366, 768), (2560, 1440), (1280, 720)],
        gpus: &[
            (
                "Google Inc. (Intel)",
                "ANGLE (Intel, Mesa Intel(R) UHD Graphics 630 (CFL GT2), OpenGL 4.6)",
            ),
            (
                "Google Inc. (AMD)",
                "ANGLE (AMD, AMD Radeon RX 580 (radeonsi, polaris10, LLVM 15.0.7), OpenGL 4.6)",
            ),
        ],
        concurrency: &[4, 8, 16],
        device_memory: &[8, 16, 32],
    },
];

/// Windows is the most common desktop, Linux the rarest.
const TEMPLATE_WEIGHTS: &[u32] = &[6, 3, 1];

const TIMEZONES: &[&str] = &["Pacific/Auckland", "Pacific/Chatham"];
const LOCALES: &[&str] = &["en-NZ", "en-US", "en-GB"];

const CIPHER_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
];

const TLS_EXTENSIONS: &[&str] = &["server_name", "status_request", "supported_groups"];
const SAMPLE_RATES: &[u32] = &[44_100, 48_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasNoise {
    /// 64-bit seed rendered as 16 hex characters.
    pub noise_seed: String,
    pub noise_intensity: u8,
    pub rendering_engine: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebGlProfile {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub shading_language_version: String,
    pub max_texture_size: u32,
    pub max_viewport_dims: (u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProfile {
    pub sample_rate: u32,
    pub max_channel_count: u8,
    pub number_of_inputs: u8,
    pub number_of_outputs: u8,
    pub channel_count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub concurrency: u32,
    pub device_memory: u32,
    pub max_touch_points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsProfile {
    pub version: String,
    pub cipher_suites: Vec<String>,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub charging: bool,
    pub level: f64,
    pub charging_time: u32,
    pub discharging_time: u32,
}

/// Immutable identity bundle. Rotation replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub platform: String,
    pub locale: String,
    pub timezone: String,
    pub viewport: Viewport,
    pub canvas: CanvasNoise,
    pub webgl: WebGlProfile,
    pub audio: AudioProfile,
    pub hardware: HardwareProfile,
    pub tls: TlsProfile,
    pub battery: BatteryState,
    pub generated_at: DateTime<Utc>,
    pub version: String,
}

/// Flat columns a profile store indexes alongside the full bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintSummary {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
    pub locale: String,
}

impl Fingerprint {
    pub fn summary(&self) -> FingerprintSummary {
        FingerprintSummary {
            user_agent: self.user_agent.clone(),
            viewport_width: self.viewport.width,
            viewport_height: self.viewport.height,
            timezone: self.timezone.clone(),
            locale: self.locale.clone(),
        }
    }
}

/// Draws fingerprints from the plausible attribute tables above.
#[derive(Debug)]
pub struct FingerprintGenerator {
    rng: StdRng,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator, mainly for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self) -> Fingerprint {
        self.generate_at(Utc::now())
    }

    pub fn generate_at(&mut self, generated_at: DateTime<Utc>) -> Fingerprint {
        let rng = &mut self.rng;

        let template = pick_template(rng);
        let (width, height) = pick(rng, template.viewports);
        let (vendor, renderer) = pick(rng, template.gpus);
        let browser = pick(rng, &[CHROME_120, CHROME_119]);
        let user_agent = format!("{} {browser}", template.ua_prefix);

        let canvas_seed: u64 = rng.r#gen();

        let mut suites: Vec<String> = CIPHER_SUITES.iter().map(|s| s.to_string()).collect();
        suites.shuffle(rng);
        suites.truncate(rng.gen_range(3..=CIPHER_SUITES.len()));

        Fingerprint {
            user_agent,
            platform: template.platform.to_string(),
            locale: pick(rng, LOCALES).to_string(),
            timezone: pick(rng, TIMEZONES).to_string(),
            viewport: Viewport { width, height },
            canvas: CanvasNoise {
                noise_seed: format!("{canvas_seed:016x}"),
                noise_intensity: rng.gen_range(1..=5),
                rendering_engine: "blink".into(),
            },
            webgl: WebGlProfile {
                vendor: vendor.to_string(),
                renderer: renderer.to_string(),
                version: "WebGL 2.0".into(),
                shading_language_version: "WebGL GLSL ES 3.00".into(),
                max_texture_size: 16_384,
                max_viewport_dims: (width, height),
            },
            audio: AudioProfile {
                sample_rate: pick(rng, SAMPLE_RATES),
                max_channel_count: rng.gen_range(2..=8),
                number_of_inputs: 1,
                number_of_outputs: 1,
                channel_count: 2,
            },
            hardware: HardwareProfile {
                concurrency: pick(rng, template.concurrency),
                device_memory: pick(rng, template.device_memory),
                // Desktop Chrome without a touchscreen.
                max_touch_points: 0,
            },
            tls: TlsProfile {
                version: "TLS 1.3".into(),
                cipher_suites: suites,
                extensions: TLS_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            },
            battery: BatteryState {
                charging: rng.gen_bool(0.5),
                level: rng.gen_range(20u32..=100) as f64 / 100.0,
                charging_time: rng.gen_range(0..=3600),
                discharging_time: rng.gen_range(3600..=36_000),
            },
            generated_at,
            version: FINGERPRINT_VERSION.into(),
        }
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn pick<T: Copy>(rng: &mut StdRng, options: &[T]) -> T {
    options.choose(rng).copied().unwrap_or(options[0])
}

fn pick_template(rng: &mut StdRng) -> &'static PlatformTemplate {
    let total: u32 = TEMPLATE_WEIGHTS.iter().sum();
    let mut roll = rng.gen_range(0..total);
    for (template, weight) in TEMPLATES.iter().zip(TEMPLATE_WEIGHTS) {
        if roll < *weight {
            return template;
        }
        roll -= weight;
    }
    &TEMPLATES[0]
}

fn template_for(platform: &str) -> Option<&'static PlatformTemplate> {
    TEMPLATES.iter().find(|template| template.platform == platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_stay_within_tables() {
        let mut generator = FingerprintGenerator::with_seed(7);
        for _ in 0..200 {
            let fp = generator.generate();
            let template = template_for(&fp.platform).unwrap();
            assert!(template.viewports.contains(&(fp.viewport.width, fp.viewport.height)));
            assert_eq!(fp.webgl.max_viewport_dims, (fp.viewport.width, fp.viewport.height));
            assert!(TIMEZONES.contains(&fp.timezone.as_str()));
            assert!(LOCALES.contains(&fp.locale.as_str()));
            assert!((1..=5).contains(&fp.canvas.noise_intensity));
            assert_eq!(fp.canvas.noise_seed.len(), 16);
            assert!((2..=8).contains(&fp.audio.max_channel_count));
            assert!((4..=16).contains(&fp.hardware.concurrency));
            assert!(template.device_memory.contains(&fp.hardware.device_memory));
            assert!((3..=5).contains(&fp.tls.cipher_suites.len()));
            assert!((0.2..=1.0).contains(&fp.battery.level));
            assert!((3600..=36_000).contains(&fp.battery.discharging_time));
            assert_eq!(fp.version, FINGERPRINT_VERSION);
        }
    }

    #[test]
    fn platform_matches_user_agent() {
        let mut generator = FingerprintGenerator::with_seed(11);
        for _ in 0..100 {
            let fp = generator.generate();
            let expected = if fp.user_agent.contains("Windows") {
                "Win32"
            } else if fp.user_agent.contains("Macintosh") {
                "MacIntel"
            } else {
                "Linux x86_64"
            };
            assert_eq!(fp.platform, expected);
        }
    }

    #[test]
    fn hardware_agrees_with_platform() {
        let mut platforms = std::collections::HashSet::new();
        for seed in 0..300 {
            let fp = FingerprintGenerator::with_seed(seed).generate();
            let renderer = fp.webgl.renderer.as_str();
            match fp.platform.as_str() {
                "Win32" => {
                    assert!(renderer.contains("D3D11"), "{renderer}");
                    assert!(!renderer.contains("Apple"), "{renderer}");
                }
                "MacIntel" => {
                    assert!(renderer.contains("OpenGL 4.1"), "{renderer}");
                    assert!(!renderer.contains("D3D11"), "{renderer}");
                }
                "Linux x86_64" => {
                    assert!(renderer.contains("OpenGL 4.6"), "{renderer}");
                    assert!(!renderer.contains("Apple"), "{renderer}");
                }
                other => panic!("unexpected platform {other}"),
            }
            assert_eq!(fp.hardware.max_touch_points, 0);
            platforms.insert(fp.platform);
        }
        assert_eq!(platforms.len(), TEMPLATES.len());
    }

    #[test]
    fn seeded_generators_agree() {
        let at = Utc::now();
        let a = FingerprintGenerator::with_seed(3).generate_at(at);
        let b = FingerprintGenerator::with_seed(3).generate_at(at);
        assert_eq!(a, b);
        assert_eq!(a.summary().viewport_width, a.viewport.width);
    }

    #[test]
    fn cipher_suites_are_distinct() {
        let mut generator = FingerprintGenerator::with_seed(5);
        let fp = generator.generate();
        let mut sorted = fp.tls.cipher_suites.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), fp.tls.cipher_suites.len());
    }
}
