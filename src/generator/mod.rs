use crate::error::Result;
use regex::Regex;

pub mod patterns;

/// Code produced for a natural-language request.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub code: String,
    /// Which strategy produced the code (e.g. "patterns", "fallback").
    pub method_used: String,
}

/// 자연어 요청을 실행 가능한 코드로 바꾸는 백엔드가 구현해야 하는 인터페이스.
/// 외부 텍스트 생성 서비스를 붙이려면 이 트레이트를 구현하면 됩니다.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, request: &str) -> Result<Generated>;

    /// Hints for making the request more specific.
    fn suggestions(&self, request: &str) -> Vec<String> {
        let _ = request;
        Vec::new()
    }
}

#[derive(Debug, Default, PartialEq)]
struct RequestElements {
    genre: Option<&'static str>,
    drums: bool,
    bass: bool,
    chords: bool,
    bpm: Option<u32>,
}

/// 키워드 매칭 + 템플릿 조합으로 코드를 만드는 기본 생성기
#[derive(Debug, Default)]
pub struct PatternGenerator;

impl PatternGenerator {
    pub fn new() -> Self {
        Self
    }

    fn parse(request: &str) -> RequestElements {
        let lower = request.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        let genre = if has(&["techno", "house", "edm", "electronic"]) {
            Some("techno")
        } else if has(&["rock", "metal", "punk"]) {
            Some("rock")
        } else if has(&["pop"]) {
            Some("pop")
        } else {
            None
        };

        let bpm = Regex::new(r"(\d{2,3})\s*bpm")
            .ok()
            .and_then(|re| re.captures(&lower))
            .and_then(|c| c[1].parse().ok())
            .or_else(|| {
                if has(&["fast", "energetic", "upbeat"]) {
                    Some(140)
                } else if has(&["slow", "chill", "calm"]) {
                    Some(80)
                } else {
                    None
                }
            });

        RequestElements {
            genre,
            drums: has(&["drum", "beat", "rhythm", "percussion"]),
            bass: has(&["bass"]),
            chords: has(&["chord", "piano", "keys", "synth", "guitar"]),
            bpm,
        }
    }
}

impl CodeGenerator for PatternGenerator {
    fn generate(&self, request: &str) -> Result<Generated> {
        let elements = Self::parse(request);
        let mut parts = Vec::new();

        if elements.drums {
            let name = match elements.genre {
                Some("techno") => "techno",
                _ => "rock",
            };
            let bpm = elements
                .bpm
                .or_else(|| patterns::find("drums", name).map(|p| p.default_bpm))
                .unwrap_or(120);
            parts.extend(patterns::render("drums", name, bpm));
        }
        if elements.bass {
            parts.extend(patterns::render("bass", "rock", elements.bpm.unwrap_or(120)));
        }
        if elements.chords {
            parts.extend(patterns::render("chords", "pop", elements.bpm.unwrap_or(110)));
        }

        if parts.is_empty() {
            let code = patterns::render("drums", "rock", elements.bpm.unwrap_or(120))
                .unwrap_or_else(|| "play 60".to_string());
            return Ok(Generated {
                code,
                method_used: "fallback".to_string(),
            });
        }

        // 드럼이 없으면 템포 지정이 빠지므로 앞에 붙여줌
        if !elements.drums {
            if let Some(bpm) = elements.bpm {
                parts.insert(0, format!("use_bpm {}", bpm));
            }
        }

        Ok(Generated {
            code: parts.join("\n\n"),
            method_used: "patterns".to_string(),
        })
    }

    fn suggestions(&self, request: &str) -> Vec<String> {
        let elements = Self::parse(request);
        let mut out = Vec::new();
        if !(elements.drums || elements.bass || elements.chords) {
            out.push("Try naming instruments like 'drums', 'bass', or 'piano'".to_string());
        }
        if elements.genre.is_none() {
            out.push("Consider adding a genre like 'rock', 'pop', or 'techno'".to_string());
        }
        if elements.bpm.is_none() {
            out.push("You can set the tempo with 'at 120 bpm' or 'fast'".to_string());
        }
        out
    }
}
