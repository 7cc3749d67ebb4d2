use rand::seq::SliceRandom;
use rand::Rng;

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const LOCALES: [&str; 2] = ["en-US", "en-GB"];

/// Per-browser fingerprint, randomized once at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintConfig {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
}

impl FingerprintConfig {
    /// Randomize around a base window size.
    ///
    /// Width and height are jittered by up to 64 pixels so parallel workers
    /// do not present identical windows.
    pub fn randomized(base_width: u32, base_height: u32) -> Self {
        let mut rng = rand::thread_rng();

        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let locale = LOCALES.choose(&mut rng).copied().unwrap_or(LOCALES[0]);

        Self {
            user_agent: user_agent.to_string(),
            viewport_width: base_width.saturating_add(rng.gen_range(0..=64)),
            viewport_height: base_height.saturating_add(rng.gen_range(0..=64)),
            locale: locale.to_string(),
        }
    }

    /// Chrome command-line switches for this fingerprint.
    pub fn chrome_args(&self) -> Vec<String> {
        vec![
            format!("--user-agent={}", self.user_agent),
            format!("--lang={}", self.locale),
        ]
    }
}
