//! Offline template generator
//!
//! Last link of every fallback chain. Deterministic, no I/O, cannot fail.

use super::prompt::{render_candidates, GenerationContext};
use crate::config::TEMPLATE_PROVIDER;

const CARE_KEYWORDS: &[&str] = &["bakım", "sulama", "sula", "yetiştir", "care", "water"];
const TOXIC_KEYWORDS: &[&str] = &["zehir", "tehlike", "toxic", "poison"];

struct TemplateText {
    header: &'static str,
    found_plants: &'static str,
    no_match: &'static str,
    text_only: &'static str,
    care_title: &'static str,
    care_tips: &'static [&'static str],
    toxic_title: &'static str,
    toxic_tips: &'static [&'static str],
    note_title: &'static str,
    note_lines: &'static [&'static str],
}

const TURKISH: TemplateText = TemplateText {
    header: "🌿 **Görsel Analizi Tamamlandı!**",
    found_plants: "**Bulunan Bitkiler:**",
    no_match: "Görsel analizi tamamlandı ancak eşleşen bitki bulunamadı. Lütfen daha net \
               bir fotoğraf veya farklı açıdan çekilmiş bir görsel deneyin.",
    text_only: "🌿 Şu anda ayrıntılı yanıt üretemiyorum. Bitkinizi tanımlayabilmem için \
                lütfen bir fotoğraf yükleyin.",
    care_title: "**💡 Bakım Önerileri:**",
    care_tips: &[
        "- Bitkinin türüne göre sulama ihtiyacı değişir",
        "- Dolaylı güneş ışığı çoğu bitki için idealdir",
        "- Toprağın üst kısmı kuruduğunda sulayın",
    ],
    toxic_title: "**⚠️ Uyarı:**",
    toxic_tips: &[
        "- Bazı bitkiler evcil hayvanlar için zararlı olabilir",
        "- Detaylı bilgi için uzman görüşü alın",
    ],
    note_title: "**📝 Not:**",
    note_lines: &[
        "- Sonuçlar PlantCLEF ve Pl@ntNet tanımlamalarının ağırlıklı birleşimidir, \
         referans listesiyle doğrulanmıştır",
        "- Kesin tanımlama için uzman görüşü önerilir",
    ],
};

const ENGLISH: TemplateText = TemplateText {
    header: "🌿 **Image analysis complete!**",
    found_plants: "**Candidate plants:**",
    no_match: "The image was analysed but no matching plant was found. Please try a \
               sharper photo or a different angle.",
    text_only: "🌿 I cannot produce a detailed answer right now. Upload a photo so I can \
                identify your plant.",
    care_title: "**💡 Care tips:**",
    care_tips: &[
        "- Watering needs depend on the species",
        "- Bright indirect light suits most plants",
        "- Water when the top of the soil has dried",
    ],
    toxic_title: "**⚠️ Warning:**",
    toxic_tips: &[
        "- Some plants are harmful to pets",
        "- Ask an expert for detailed advice",
    ],
    note_title: "**📝 Note:**",
    note_lines: &[
        "- Results are a weighted combination of PlantCLEF and Pl@ntNet identifications, \
         checked against the reference checklist",
        "- Consult an expert for a definitive identification",
    ],
};

fn text_for(language: &str) -> &'static TemplateText {
    match language {
        "en" => &ENGLISH,
        _ => &TURKISH,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn name(&self) -> &'static str {
        TEMPLATE_PROVIDER
    }

    /// Always produces a non-empty answer
    pub fn render(&self, context: &GenerationContext) -> String {
        let text = text_for(&context.language);
        let question = context.question.to_lowercase();

        let mut parts: Vec<String> = Vec::new();
        match &context.ensemble {
            Some(ensemble) if ensemble.is_empty() => return text.no_match.to_string(),
            Some(ensemble) => {
                parts.push(text.header.to_string());
                parts.push(String::new());
                parts.push(text.found_plants.to_string());
                parts.push(render_candidates(ensemble, &context.language));
                parts.push(String::new());
            }
            None => {
                parts.push(text.text_only.to_string());
                parts.push(String::new());
            }
        }

        if contains_any(&question, CARE_KEYWORDS) {
            parts.push(text.care_title.to_string());
            parts.extend(text.care_tips.iter().map(|s| s.to_string()));
        } else if contains_any(&question, TOXIC_KEYWORDS) {
            parts.push(text.toxic_title.to_string());
            parts.extend(text.toxic_tips.iter().map(|s| s.to_string()));
        } else if context.ensemble.is_some() {
            parts.push(text.note_title.to_string());
            parts.extend(text.note_lines.iter().map(|s| s.to_string()));
        }

        parts.join("\n").trim_end().to_string()
    }
}
