//! # Astro Profile Generator
//!
//! Turns a birth record into a textual personality summary by asking the
//! [`Ephemeris`] port for planetary placements and annotating each with a
//! trait phrase. Calculation failures are absorbed into a generic fallback
//! profile; a broken chart must never abort a chat turn.

use crate::models::{BirthData, Gender, NatalChart};
use crate::traits::Ephemeris;

/// Builds the personality profile text for a character.
///
/// Recoverable ephemeris failures (bad data, library errors) degrade to a
/// gender-parameterized fallback and are logged. Genuine bugs (panics)
/// propagate: fail loud for bugs, fail soft for expected degradation.
pub fn generate_profile(ephemeris: &dyn Ephemeris, birth: &BirthData, gender: Gender) -> String {
    match ephemeris.natal_chart(birth) {
        Ok(chart) => render_profile(&chart),
        Err(err) => {
            log::warn!(
                "natal chart calculation failed for '{}': {err:#}; using fallback profile",
                birth.name
            );
            fallback_profile(gender)
        }
    }
}

/// Renders the five placements with their trait annotations.
pub fn render_profile(chart: &NatalChart) -> String {
    format!(
        "Sun Sign: {sun} - Core identity and ego\n\
         Moon Sign: {moon} - Emotional nature and inner self\n\
         Mercury: {mercury} - Communication style\n\
         Venus: {venus} - Love language and romantic nature\n\
         Mars: {mars} - Drive, passion, and how they pursue what they want\n\
         \n\
         This person's {sun} sun gives them {sun_traits}.\n\
         Their {moon} moon means they process emotions {moon_traits}.\n\
         Mercury in {mercury} has them communicating {mercury_traits}.\n\
         With Venus in {venus}, they express love {venus_traits}.\n\
         Their {mars} mars pursues what it wants {mars_traits}.",
        sun = chart.sun.name(),
        moon = chart.moon.name(),
        mercury = chart.mercury.name(),
        venus = chart.venus.name(),
        mars = chart.mars.name(),
        sun_traits = sun_traits(chart.sun.name()),
        moon_traits = moon_traits(chart.moon.name()),
        mercury_traits = mercury_traits(chart.mercury.name()),
        venus_traits = venus_traits(chart.venus.name()),
        mars_traits = mars_traits(chart.mars.name()),
    )
}

/// Generic profile used when the chart cannot be computed.
pub fn fallback_profile(gender: Gender) -> String {
    let (subject, possessive) = match gender {
        Gender::Male => ("He", "his"),
        Gender::Female => ("She", "her"),
    };
    format!(
        "A mysterious and intriguing personality. {subject} keeps {possessive} \
         inner world guarded and reveals it only a little at a time."
    )
}

/// Lowercased first three letters of a sign name. Trait tables key on this
/// so a placement source that changes full-name casing (or abbreviates)
/// still resolves.
fn sign_key(sign_name: &str) -> String {
    sign_name.chars().take(3).flat_map(char::to_lowercase).collect()
}

fn sun_traits(sign_name: &str) -> &'static str {
    match sign_key(sign_name).as_str() {
        "ari" => "bold confidence and adventurous spirit",
        "tau" => "steady reliability and sensual appreciation",
        "gem" => "quick wit and intellectual curiosity",
        "can" => "nurturing warmth and emotional depth",
        "leo" => "charismatic presence and generous heart",
        "vir" => "analytical mind and helpful nature",
        "lib" => "charming diplomacy and aesthetic sensibility",
        "sco" => "intense passion and magnetic mystique",
        "sag" => "optimistic enthusiasm and philosophical mind",
        "cap" => "ambitious drive and responsible nature",
        "aqu" => "innovative thinking and humanitarian ideals",
        "pis" => "dreamy creativity and empathetic soul",
        _ => "unique and complex personality",
    }
}

fn moon_traits(sign_name: &str) -> &'static str {
    match sign_key(sign_name).as_str() {
        "ari" => "with fiery immediacy and quick recovery",
        "tau" => "slowly but with deep, lasting feelings",
        "gem" => "by talking and analyzing them",
        "can" => "deeply and with strong intuition",
        "leo" => "dramatically and with pride",
        "vir" => "practically and with attention to detail",
        "lib" => "seeking balance and harmony",
        "sco" => "intensely and transformatively",
        "sag" => "optimistically and with perspective",
        "cap" => "stoically and with maturity",
        "aqu" => "rationally and with detachment",
        "pis" => "empathetically and intuitively",
        _ => "in their own unique way",
    }
}

fn mercury_traits(sign_name: &str) -> &'static str {
    match sign_key(sign_name).as_str() {
        "ari" => "directly and without much patience",
        "tau" => "deliberately, weighing every word",
        "gem" => "fast, playful, and full of tangents",
        "can" => "gently, reading between the lines",
        "leo" => "expressively and with flair",
        "vir" => "precisely, noticing every detail",
        "lib" => "tactfully, always weighing both sides",
        "sco" => "sparingly, but with cutting insight",
        "sag" => "bluntly and with big-picture sweep",
        "cap" => "economically and to the point",
        "aqu" => "unconventionally, from odd angles",
        "pis" => "impressionistically, in images and moods",
        _ => "in a style all their own",
    }
}

fn venus_traits(sign_name: &str) -> &'static str {
    match sign_key(sign_name).as_str() {
        "ari" => "passionately and with bold gestures",
        "tau" => "through physical affection and gifts",
        "gem" => "through words and intellectual connection",
        "can" => "through nurturing and emotional security",
        "leo" => "grandly and with romantic flair",
        "vir" => "through acts of service and devotion",
        "lib" => "gracefully and with romantic idealism",
        "sco" => "intensely and with total devotion",
        "sag" => "adventurously and with freedom",
        "cap" => "steadily and with commitment",
        "aqu" => "uniquely and with friendship first",
        "pis" => "dreamily and with spiritual connection",
        _ => "in their own special way",
    }
}

fn mars_traits(sign_name: &str) -> &'static str {
    match sign_key(sign_name).as_str() {
        "ari" => "head-on, the moment the impulse strikes",
        "tau" => "slowly but with immovable persistence",
        "gem" => "on several fronts at once, led by curiosity",
        "can" => "indirectly, protecting what it cares about",
        "leo" => "theatrically and for an audience",
        "vir" => "methodically, refining as it goes",
        "lib" => "through charm rather than force",
        "sco" => "relentlessly and below the surface",
        "sag" => "impulsively, chasing the horizon",
        "cap" => "patiently, playing the long game",
        "aqu" => "on principle, often against the grain",
        "pis" => "elusively, by yielding and returning",
        _ => "in ways that are hard to predict",
    }
}
