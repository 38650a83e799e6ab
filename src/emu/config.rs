/// How the Fx0A (wait for key) instruction resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyWaitPolicy {
    /// Park the processor until a key goes from released to pressed, store the
    /// lowest such key and advance PC by exactly one instruction.
    #[default]
    Edge,
    /// Every key held during the cycle stores its index and advances PC by 2,
    /// so several held keys skip several instructions. Nothing held stalls.
    Legacy,
}

/// Behavioural switches of the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub key_wait: KeyWaitPolicy,
}

impl Config {
    pub fn with_key_wait(mut self, key_wait: KeyWaitPolicy) -> Self {
        self.key_wait = key_wait;
        self
    }
}
