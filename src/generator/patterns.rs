use std::collections::BTreeMap;

/// 템플릿 하나. `code` 안의 `{bpm}`은 요청 시 치환됩니다.
#[derive(Debug)]
pub struct Pattern {
    pub category: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub default_bpm: u32,
    pub code: &'static str,
}

pub static PATTERNS: &[Pattern] = &[
    Pattern {
        category: "drums",
        name: "rock",
        description: "Kick and snare backbeat",
        default_bpm: 120,
        code: "use_bpm {bpm}\n\
               live_loop :rock_drums do\n  \
                 sample :bd_haus\n  sleep 1\n  \
                 sample :sn_dub\n  sleep 1\n\
               end",
    },
    Pattern {
        category: "drums",
        name: "techno",
        description: "Four-on-the-floor kick with off-beat hats",
        default_bpm: 128,
        code: "use_bpm {bpm}\n\
               live_loop :techno_kick do\n  \
                 sample :bd_tek\n  sleep 1\n\
               end\n\n\
               live_loop :techno_hats do\n  \
                 sleep 0.5\n  sample :drum_cymbal_closed, amp: 0.6\n  sleep 0.5\n\
               end",
    },
    Pattern {
        category: "bass",
        name: "rock",
        description: "Root-note eighths",
        default_bpm: 120,
        code: "live_loop :rock_bass do\n  \
                 use_synth :fm\n  \
                 4.times do\n    play :e2, release: 0.3\n    sleep 0.5\n  end\n\
               end",
    },
    Pattern {
        category: "chords",
        name: "pop",
        description: "I-V-vi-IV progression",
        default_bpm: 110,
        code: "live_loop :pop_chords do\n  \
                 use_synth :piano\n  \
                 [chord(:c4, :major), chord(:g3, :major), chord(:a3, :minor), chord(:f3, :major)].each do |c|\n    \
                   play c, sustain: 1.5\n    sleep 2\n  end\n\
               end",
    },
];

pub fn find(category: &str, name: &str) -> Option<&'static Pattern> {
    PATTERNS
        .iter()
        .find(|p| p.category.eq_ignore_ascii_case(category) && p.name.eq_ignore_ascii_case(name))
}

/// Render a pattern with the given tempo.
pub fn render(category: &str, name: &str, bpm: u32) -> Option<String> {
    find(category, name).map(|p| p.code.replace("{bpm}", &bpm.to_string()))
}

/// category -> pattern names
pub fn catalog() -> BTreeMap<&'static str, Vec<&'static str>> {
    let mut map: BTreeMap<&'static str, Vec<&'static str>> = BTreeMap::new();
    for p in PATTERNS {
        map.entry(p.category).or_default().push(p.name);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_bpm() {
        let code = render("drums", "techno", 132).unwrap();
        assert!(code.starts_with("use_bpm 132\n"));
        assert!(!code.contains("{bpm}"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(find("Drums", "ROCK").is_some());
        assert!(find("drums", "polka").is_none());
    }

    #[test]
    fn catalog_groups_by_category() {
        let catalog = catalog();
        assert_eq!(catalog["drums"], vec!["rock", "techno"]);
        assert_eq!(catalog.keys().copied().collect::<Vec<_>>(), vec!["bass", "chords", "drums"]);
    }
}
