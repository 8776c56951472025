//! Embedded model pricing.
//!
//! Prices are hundredths of a cent per one million tokens, keyed by
//! lowercase provider and a lowercase model prefix. Prefix matching lets
//! dated releases (`gpt-4o-mini-2024-07-18`) resolve to their family; the
//! longest matching prefix wins. Unknown models price at zero; tokens
//! are still recorded, cost is not.

use tokfence_core::money::estimate_cost;

/// Per-million-token prices for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPrice {
    /// Input (prompt) price, hundredths of a cent per 1M tokens.
    pub input: i64,
    /// Output (completion) price, hundredths of a cent per 1M tokens.
    pub output: i64,
}

impl ModelPrice {
    /// The zero price used for unknown models.
    pub const ZERO: Self = Self {
        input: 0,
        output: 0,
    };
}

/// (provider, model prefix, input, output).
type Entry = (&'static str, &'static str, i64, i64);

// Derived from provider list prices in USD per 1M tokens, scaled by 1e4.
static PRICES: &[Entry] = &[
    // OpenAI
    ("openai", "gpt-4o-mini", 1_500, 6_000),
    ("openai", "gpt-4o", 25_000, 100_000),
    ("openai", "gpt-4.1-nano", 1_000, 4_000),
    ("openai", "gpt-4.1-mini", 4_000, 16_000),
    ("openai", "gpt-4.1", 20_000, 80_000),
    ("openai", "gpt-3.5-turbo", 5_000, 15_000),
    ("openai", "o3", 20_000, 80_000),
    ("openai", "o4-mini", 11_000, 44_000),
    // Anthropic
    ("anthropic", "claude-opus-4", 150_000, 750_000),
    ("anthropic", "claude-sonnet-4", 30_000, 150_000),
    ("anthropic", "claude-3-7-sonnet", 30_000, 150_000),
    ("anthropic", "claude-3-5-haiku", 8_000, 40_000),
    ("anthropic", "claude-3-haiku", 2_500, 12_500),
    // Google
    ("google", "gemini-2.5-pro", 12_500, 100_000),
    ("google", "gemini-2.5-flash", 3_000, 25_000),
    ("google", "gemini-2.0-flash", 1_000, 4_000),
    ("google", "gemini-1.5-pro", 12_500, 50_000),
    ("google", "gemini-1.5-flash", 750, 3_000),
    // Mistral
    ("mistral", "mistral-large", 20_000, 60_000),
    ("mistral", "mistral-small", 1_000, 3_000),
    // Groq-hosted Llama
    ("groq", "llama-3.3-70b", 5_900, 7_900),
    ("groq", "llama-3.1-8b", 500, 800),
    // DeepSeek
    ("deepseek", "deepseek-chat", 2_700, 11_000),
    ("deepseek", "deepseek-reasoner", 5_500, 21_900),
];

/// The embedded pricing table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingTable;

impl PricingTable {
    /// Look up a model's price. Unknown models return [`ModelPrice::ZERO`].
    #[must_use]
    pub fn lookup(&self, provider: &str, model: &str) -> ModelPrice {
        let provider = provider.to_ascii_lowercase();
        let model = model.to_ascii_lowercase();
        let mut best: Option<(&Entry, usize)> = None;
        for entry in PRICES {
            if entry.0 == provider && model.starts_with(entry.1) {
                let len = entry.1.len();
                if best.is_none_or(|(_, best_len)| len > best_len) {
                    best = Some((entry, len));
                }
            }
        }
        best.map_or(ModelPrice::ZERO, |(entry, _)| ModelPrice {
            input: entry.2,
            output: entry.3,
        })
    }

    /// Estimated cost in hundredths of a cent.
    #[must_use]
    pub fn estimate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> i64 {
        let price = self.lookup(provider, model);
        estimate_cost(input_tokens, output_tokens, price.input, price.output)
    }
}
