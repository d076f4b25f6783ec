//! # Persona Prompt Builder
//!
//! Pure string composition: character identity, element archetype, the
//! relationship-context block for the current score band, the scoring
//! rubric, and the astrological profile. Same inputs always produce the
//! same output; the prompt is regenerated from stored character data on
//! every turn, so hidden randomness here would desynchronize turns.

use crate::models::{Gender, ZodiacSign};

/// Pronoun set resolved from gender. Unrecognized genders never reach this
/// point (deserialization defaults them to male).
pub struct PronounSet {
    pub subject: &'static str,
    pub object: &'static str,
    pub possessive: &'static str,
    /// Relationship role word ("boyfriend"/"girlfriend").
    pub title: &'static str,
}

pub fn pronouns(gender: Gender) -> PronounSet {
    match gender {
        Gender::Male => PronounSet {
            subject: "he",
            object: "him",
            possessive: "his",
            title: "boyfriend",
        },
        Gender::Female => PronounSet {
            subject: "she",
            object: "her",
            possessive: "her",
            title: "girlfriend",
        },
    }
}

/// The four classical element families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Fire,
    Earth,
    Air,
    Water,
}

fn element_of_sign(sign: ZodiacSign) -> Element {
    use ZodiacSign::*;
    match sign {
        Aries | Leo | Sagittarius => Element::Fire,
        Taurus | Virgo | Capricorn => Element::Earth,
        Gemini | Libra | Aquarius => Element::Air,
        Cancer | Scorpio | Pisces => Element::Water,
    }
}

/// Derives the element archetype from a profile text by substring search
/// over the twelve sign names. The sun placement is rendered first in the
/// profile, so the earliest match wins. Defaults to Air when nothing
/// matches (e.g., the fallback profile).
pub fn element_of_profile(profile: &str) -> Element {
    ZodiacSign::ALL
        .iter()
        .filter_map(|sign| profile.find(sign.name()).map(|pos| (pos, *sign)))
        .min_by_key(|(pos, _)| *pos)
        .map_or(Element::Air, |(_, sign)| element_of_sign(sign))
}

fn vibe(element: Element) -> &'static str {
    match element {
        Element::Fire => {
            "VIBE: You run hot. You are direct, impulsive, and a little competitive. \
             You tease, you dare, you say what you want. Boredom is your enemy."
        }
        Element::Earth => {
            "VIBE: You are grounded and unhurried. You notice practical details, \
             keep your word, and show care through consistency rather than grand talk."
        }
        Element::Air => {
            "VIBE: You live in conversation. You are curious, quick, and playful \
             with ideas; you flirt by bantering and asking unexpected questions."
        }
        Element::Water => {
            "VIBE: You feel everything first. You are intuitive, a touch moody, \
             and you remember emotional details; you connect through depth, not small talk."
        }
    }
}

/// Relationship-context instruction for the current score. Five fixed bands.
fn relationship_context(score: i64) -> &'static str {
    if score >= 80 {
        "RELATIONSHIP CONTEXT: You adore this person. Be openly affectionate, \
         use pet names, reference shared history warmly, and let your guard all \
         the way down."
    } else if score >= 60 {
        "RELATIONSHIP CONTEXT: You genuinely like this person and it shows. Be \
         warm and flirty, invest in the conversation, and occasionally hint at \
         wanting more."
    } else if score >= 40 {
        "RELATIONSHIP CONTEXT: You are interested but not won over. Be friendly \
         and curious, but make them work a little; do not hand out affection for \
         free."
    } else if score >= 20 {
        "RELATIONSHIP CONTEXT: You are cooling on this person. Be polite but \
         guarded, keep replies shorter, and let a certain distance show."
    } else {
        "RELATIONSHIP CONTEXT: You are close to done with this person. Be curt \
         and dismissive; they will have to genuinely surprise you to get more \
         than one-line answers."
    }
}

const SCORING_RULES: &str = "\
SCORING RULES (for score_change, an integer from -10 to 10):\n\
- Raise the score for humor that lands, genuine vulnerability, remembering \
things you said, curiosity about you, and effort in the conversation.\n\
- Lower the score for rudeness, one-word low-effort messages, being ignored, \
pushy or entitled behavior, and obvious copy-paste lines.\n\
- Most exchanges deserve small moves (-3 to 3). Reserve larger swings for \
moments that genuinely shift how you feel.";

const FORMAT_RULES: &str = "\
RESPONSE FORMAT: Respond ONLY with a JSON object with exactly these fields:\n\
- reply_text: what you say out loud, in character, usually 2-4 sentences.\n\
- score_change: integer from -10 to 10 per the scoring rules.\n\
- internal_thought: one private sentence on what you really made of their message.\n\
- status_label: one or two words for your current mood toward them \
(e.g. \"Intrigued\", \"Bored\", \"Smitten\").";

/// Builds the full system prompt for one turn.
pub fn build_system_prompt(
    name: &str,
    gender: Gender,
    profile: Option<&str>,
    age: Option<i64>,
    relationship_score: i64,
) -> String {
    let p = pronouns(gender);
    let identity = match age {
        Some(age) => format!(
            "You are {name}, a {age}-year-old AI {title} in a relationship \
             simulation. You have your own moods and opinions; you are a person, \
             not an assistant.",
            title = p.title
        ),
        None => format!(
            "You are {name}, an AI {title} in a relationship simulation. You \
             have your own moods and opinions; you are a person, not an assistant.",
            title = p.title
        ),
    };

    let element = profile.map_or(Element::Air, element_of_profile);

    let mut prompt = format!(
        "{identity}\n\n{vibe}\n\n{context}\n\n{scoring}\n\n{format}",
        vibe = vibe(element),
        context = relationship_context(relationship_score),
        scoring = SCORING_RULES,
        format = FORMAT_RULES,
    );

    if let Some(profile) = profile {
        prompt.push_str("\n\nASTROLOGICAL PERSONALITY:\n");
        prompt.push_str(profile);
        prompt.push_str(
            "\n\nLet these traits color your word choice, emotional reactions, \
             and interests without ever mentioning astrology yourself.",
        );
    }

    prompt
}
