//! Structured generation context and prompt rendering
//!
//! Every provider in the chain receives the same [`Prompt`], built once per
//! request from the ranked result, prior turns and the user's question.

use crate::types::{ChatTurn, EnsembleEntry, EnsembleResult, Role};
use serde::Serialize;

/// Prior turns forwarded to remote providers
pub const HISTORY_TURNS: usize = 10;
/// Entries described in the prompt
pub const PROMPT_ENTRIES: usize = 3;
/// Characters of knowledge-base description kept per entry
pub const DESCRIPTION_CHARS: usize = 300;

/// Messages that just ask "what is this plant"
const IDENTIFY_PHRASES: &[&str] = &["", "identify", "tanı", "nedir", "what is", "bu ne", "bu ne?"];

/// Everything a generator may use
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub question: String,
    /// Ranked result; `None` for text-only chat with no earlier identification
    pub ensemble: Option<EnsembleResult>,
    pub history: Vec<ChatTurn>,
    /// ISO 639-1 answer language
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Name and describe the uploaded plant
    Identify,
    /// Answer a specific question about it
    Question,
}

pub fn classify_intent(message: &str) -> Intent {
    let normalized = message.trim().to_lowercase();
    if IDENTIFY_PHRASES.contains(&normalized.as_str()) {
        Intent::Identify
    } else {
        Intent::Question
    }
}

/// Language-specific wording
pub(crate) struct Phrases {
    pub system: &'static str,
    pub weights: &'static str,
    pub common_name: &'static str,
    pub family: &'static str,
    pub weighted_score: &'static str,
    pub score: &'static str,
    pub source: &'static str,
    pub verified: &'static str,
    pub unverified: &'static str,
    pub description: &'static str,
    pub unknown: &'static str,
    pub found_plants: &'static str,
    pub identify_task: &'static str,
    pub question_label: &'static str,
    pub question_task: &'static str,
}

const TURKISH: Phrases = Phrases {
    system: "Sen bir botanik uzmanısın. Kullanıcılara bitki tanımlama ve bitki bilgisi \
             konusunda yardımcı oluyorsun. Yanıtlarını her zaman Türkçe ver. Bilimsel ve \
             yararlı bilgiler sun.",
    weights: "AĞIRLIKLAR",
    common_name: "Yerel İsim",
    family: "Aile",
    weighted_score: "AĞIRLIKLI SKOR",
    score: "Skoru",
    source: "Kaynak",
    verified: "✓ Referans listesinde doğrulandı",
    unverified: "Doğrulanmadı",
    description: "Açıklama",
    unknown: "Bilinmiyor",
    found_plants: "BULUNAN BİTKİLER (Ağırlıklı Ensemble)",
    identify_task: "GÖREV: En yüksek ağırlıklı skora sahip bitkiyi ana sonuç olarak belirle. \
                    Birden fazla kaynak aynı bitkiyi onaylıyorsa güvenilirlik yüksektir. \
                    Her bitki için kısa açıklama yap.",
    question_label: "Kullanıcı sorusu",
    question_task: "GÖREV: Soruyu bu bitki bilgileriyle cevaplayarak yanıt ver. En yüksek \
                    ağırlıklı skora sahip bitkiyi referans al.",
};

const ENGLISH: Phrases = Phrases {
    system: "You are a botany expert helping people identify plants and learn about them. \
             Always answer in English with accurate, useful information.",
    weights: "WEIGHTS",
    common_name: "Common name",
    family: "Family",
    weighted_score: "WEIGHTED SCORE",
    score: "score",
    source: "Source",
    verified: "✓ Verified against reference checklist",
    unverified: "Unverified",
    description: "Description",
    unknown: "Unknown",
    found_plants: "CANDIDATE PLANTS (weighted ensemble)",
    identify_task: "TASK: Treat the plant with the highest weighted score as the main result. \
                    Agreement between several sources means higher reliability. Describe \
                    each plant briefly.",
    question_label: "User question",
    question_task: "TASK: Answer the question using the plant information above, referring \
                    to the plant with the highest weighted score.",
};

pub(crate) fn phrases(language: &str) -> &'static Phrases {
    match language {
        "en" => &ENGLISH,
        _ => &TURKISH,
    }
}

/// One chat message for a remote provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Provider-neutral prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    /// History followed by the current user message
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    /// System message first, as chat-completion APIs expect
    pub fn to_chat_messages(&self) -> Vec<PromptMessage> {
        std::iter::once(PromptMessage::new("system", self.system.clone()))
            .chain(self.messages.iter().cloned())
            .collect()
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn describe_entry(rank: usize, entry: &EnsembleEntry, p: &Phrases) -> String {
    let mut lines = vec![
        format!("#{} {}", rank, entry.scientific_name),
        format!(
            "   {}: {}",
            p.common_name,
            entry.common_name.as_deref().unwrap_or(p.unknown)
        ),
        format!("   {}: {}", p.family, entry.family.as_deref().unwrap_or(p.unknown)),
    ];
    for (source, confidence) in &entry.source_scores {
        lines.push(format!("   {} {}: {:.1}%", source, p.score, confidence * 100.0));
    }
    lines.push(format!(
        "   {}: {:.1}%",
        p.weighted_score,
        entry.weighted_score * 100.0
    ));
    lines.push(format!(
        "   {}: {}, {}",
        p.source,
        entry.source_label(),
        if entry.verified { p.verified } else { p.unverified }
    ));
    if let Some(description) = &entry.enrichment.description {
        lines.push(format!(
            "   {}: {}",
            p.description,
            truncate_chars(description, DESCRIPTION_CHARS)
        ));
    }
    lines.join("\n")
}

/// Weights line plus the top entries, as shown to every generator
pub fn render_candidates(ensemble: &EnsembleResult, language: &str) -> String {
    let p = phrases(language);
    let weights = ensemble
        .weights
        .iter()
        .map(|(source, weight)| format!("{}={:.0}%", source, weight * 100.0))
        .collect::<Vec<_>>()
        .join(", ");

    let mut parts = vec![format!("{}: {}", p.weights, weights)];
    parts.extend(
        ensemble
            .entries
            .iter()
            .take(PROMPT_ENTRIES)
            .enumerate()
            .map(|(i, entry)| describe_entry(i + 1, entry, p)),
    );
    parts.join("\n\n")
}

/// Build the prompt every remote provider receives
pub fn build_prompt(context: &GenerationContext) -> Prompt {
    let p = phrases(&context.language);

    let start = context.history.len().saturating_sub(HISTORY_TURNS);
    let mut messages: Vec<PromptMessage> = context.history[start..]
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            PromptMessage::new(role, turn.text.clone())
        })
        .collect();

    let current = match context.ensemble.as_ref().filter(|e| !e.is_empty()) {
        Some(ensemble) => {
            let candidates = render_candidates(ensemble, &context.language);
            match classify_intent(&context.question) {
                Intent::Identify => format!(
                    "{}:\n{}\n\n{}",
                    p.found_plants, candidates, p.identify_task
                ),
                Intent::Question => format!(
                    "{}: {}\n\n{}:\n{}\n\n{}",
                    p.question_label, context.question, p.found_plants, candidates, p.question_task
                ),
            }
        }
        None => context.question.clone(),
    };
    messages.push(PromptMessage::new("user", current));

    Prompt {
        system: p.system.to_string(),
        messages,
    }
}
