//! Prebuilt voice catalogue.

use rand::seq::SliceRandom;
use rand::Rng;

/// Voices the dialog service offers.
pub const VOICES: [&str; 30] = [
    "Zephyr",
    "Puck",
    "Charon",
    "Kore",
    "Fenrir",
    "Leda",
    "Orus",
    "Aoede",
    "Callirrhoe",
    "Autonoe",
    "Enceladus",
    "Iapetus",
    "Umbriel",
    "Algieba",
    "Despina",
    "Erinome",
    "Sulafat",
    "Algenib",
    "Rasalgethi",
    "Laomedeia",
    "Achernar",
    "Alnilam",
    "Schedar",
    "Gacrux",
    "Pulcherrima",
    "Achird",
    "Zubenelgenubi",
    "Vindemiatrix",
    "Sadachbia",
    "Sadaltager",
];

/// Case-insensitive lookup returning the canonical spelling.
pub fn find_voice(name: &str) -> Option<&'static str> {
    let name = name.trim();
    VOICES.iter().copied().find(|v| v.eq_ignore_ascii_case(name))
}

/// Pick a voice at random, avoiding `exclude` when possible.
pub fn random_voice<R: Rng + ?Sized>(rng: &mut R, exclude: Option<&str>) -> &'static str {
    let candidates: Vec<&'static str> = VOICES
        .iter()
        .copied()
        .filter(|v| exclude.map_or(true, |x| !v.eq_ignore_ascii_case(x)))
        .collect();
    candidates.choose(rng).copied().unwrap_or(VOICES[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn random_voice_avoids_current() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_ne!(random_voice(&mut rng, Some("Puck")), "Puck");
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(find_voice(" kore "), Some("Kore"));
        assert_eq!(find_voice("Nobody"), None);
    }
}
