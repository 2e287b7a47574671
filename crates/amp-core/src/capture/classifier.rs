//! Heuristic span classification.
//!
//! A [`Classifier`] maps one text span to a memory type, a confidence, and a
//! title. [`RuleClassifier`] is the regex-driven implementation; the capture
//! sources each get a rule set, but any classifier can be plugged in.

use amp_store::{Confidence, MemoryType};
use regex::{Captures, Regex};

/// Longest title a classifier emits.
pub const MAX_TITLE_LEN: usize = 120;

/// Outcome of classifying one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub memory_type: MemoryType,
    pub confidence: Confidence,
    pub title: String,
    /// Name of the rule that fired, kept as the candidate's rationale.
    pub rule: &'static str,
}

/// Maps a text span to a classification. `None` means no cue matched.
pub trait Classifier: Send + Sync {
    fn classify(&self, span: &str) -> Option<Classification>;
}

/// One lexical cue. The title template references capture groups as `$1`,
/// `$2`, ...; a group that did not participate renders as `unknown`. Without
/// a template the first line of the span is the title.
#[derive(Debug, Clone)]
pub struct CueRule {
    pub name: &'static str,
    pub memory_type: MemoryType,
    pub confidence: Confidence,
    pattern: Regex,
    template: Option<&'static str>,
}

impl CueRule {
    /// Compile a case-insensitive rule. Panics on an invalid pattern.
    pub fn new(
        name: &'static str,
        pattern: &'static str,
        memory_type: MemoryType,
        confidence: Confidence,
    ) -> Self {
        Self {
            name,
            memory_type,
            confidence,
            pattern: Regex::new(&format!("(?i){pattern}")).expect("static cue pattern"),
            template: None,
        }
    }

    pub fn with_title(mut self, template: &'static str) -> Self {
        self.template = Some(template);
        self
    }

    fn apply(&self, span: &str) -> Option<String> {
        let caps = self.pattern.captures(span)?;
        let title = match self.template {
            Some(template) => render(template, &caps),
            None => span.lines().next().unwrap_or_default().to_string(),
        };
        Some(clean_title(&title))
    }
}

/// How a rule set resolves several matching rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// The first matching rule in declaration order wins.
    #[default]
    FirstMatch,
    /// The highest-confidence rule wins; the first declared wins among equals.
    /// When rules of different types tie at the top the result is
    /// downgraded to low confidence.
    BestConfidence,
}

/// Ordered list of cue rules.
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    rules: Vec<CueRule>,
    policy: MatchPolicy,
    min_title_len: usize,
}

impl RuleClassifier {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            rules: Vec::new(),
            policy,
            min_title_len: 0,
        }
    }

    pub fn with_rule(mut self, rule: CueRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rules whose rendered title is shorter than `len` are ignored.
    pub fn with_min_title_len(mut self, len: usize) -> Self {
        self.min_title_len = len;
        self
    }

    pub fn rules(&self) -> &[CueRule] {
        &self.rules
    }

    /// Conventional-commit prefixes, then plain-language cues. Matched
    /// against `subject\nbody`, so `^` anchors at the subject.
    pub fn commits() -> Self {
        use Confidence::*;
        use MemoryType::*;
        Self::new(MatchPolicy::FirstMatch)
            .with_rule(CueRule::new("breaking_change", r"BREAKING[ _]CHANGE", Risk, High))
            .with_rule(CueRule::new("fix", r"^(?:fix|bugfix|hotfix)[(:]", Observation, High))
            .with_rule(CueRule::new("feat", r"^(?:feat|add|feature)[(:]", Fact, Medium))
            .with_rule(CueRule::new("refactor", r"^(?:refactor|perf|optimize)[(:]", Decision, Medium))
            .with_rule(CueRule::new("docs", r"^(?:docs|doc)[(:]", Fact, Low))
            .with_rule(CueRule::new("test", r"^(?:test|tests)[(:]", Observation, Low))
            .with_rule(CueRule::new("chore", r"^(?:ci|build|chore)[(:]", Observation, Low))
            .with_rule(CueRule::new("revert", r"^revert[(:]", Observation, Medium))
            .with_rule(CueRule::new("style", r"^style[(:]", Preference, Low))
            .with_rule(CueRule::new("root_cause", r"\broot cause\b", Observation, Medium))
            .with_rule(CueRule::new("fixed", r"^(?:fixed|fixes)\b", Observation, Medium))
            .with_rule(CueRule::new("decided", r"\b(?:decided|chose \S+ over)\b", Decision, Medium))
            .with_rule(CueRule::new(
                "open_question",
                r"\b(?:unresolved|open question|tbd|to be decided)\b",
                Question,
                Medium,
            ))
            .with_rule(CueRule::new("trailing_question", r"^[^\n]+\?[ \t]*(?:\n|$)", Question, Low))
    }

    /// CI and test log lines. Specific shapes come before the generic
    /// `FAIL`/`ERROR` catch-alls so a compiler error is not reported as a
    /// test failure.
    pub fn logs() -> Self {
        use Confidence::*;
        use MemoryType::*;
        Self::new(MatchPolicy::FirstMatch)
            .with_rule(
                CueRule::new("pytest_failure", r"FAILED\s+([\w/]+\.py::[\w:]+)", Observation, High)
                    .with_title("Test failure: $1"),
            )
            .with_rule(
                CueRule::new(
                    "compiler_error",
                    r"(\S+\.\w+):(\d+):\d+:\s*error:\s*(.+)",
                    Observation,
                    High,
                )
                .with_title("Build error in $1:$2"),
            )
            .with_rule(
                CueRule::new(
                    "linker_error",
                    r"(?:undefined reference to|cannot find -l)(.+)",
                    Observation,
                    High,
                )
                .with_title("Linker error: $1"),
            )
            .with_rule(
                CueRule::new("cmake_error", r"CMake Error.*?:\s*(.+)", Observation, High)
                    .with_title("CMake error: $1"),
            )
            .with_rule(
                CueRule::new(
                    "deprecation",
                    r"(?:DeprecationWarning|FutureWarning):\s*(.+)",
                    Risk,
                    Medium,
                )
                .with_title("Deprecation warning: $1"),
            )
            .with_rule(
                CueRule::new("timeout", r"(?:TimeoutError|timed?\s*out)\s*:?\s*(.+)?", Observation, High)
                    .with_title("Timeout: $1"),
            )
            .with_rule(
                CueRule::new(
                    "test_failure",
                    r"(?:FAILED|FAIL|ERROR)\s*:?\s*(?:test_?)?(\S+?)(?:\s*[-—]\s*(.+))?$",
                    Observation,
                    High,
                )
                .with_title("CI test failure: $1"),
            )
            .with_rule(
                CueRule::new("generic_error", r"^(?:Error|ERROR)\s*:?\s*(.+)", Observation, Medium)
                    .with_title("CI error: $1"),
            )
    }

    /// Conversation statements.
    pub fn transcripts() -> Self {
        use Confidence::*;
        use MemoryType::*;
        let rule = |name: &'static str, pattern: &'static str, t: MemoryType, c: Confidence| {
            CueRule::new(name, pattern, t, c).with_title("$1")
        };
        Self::new(MatchPolicy::BestConfidence)
            .with_min_title_len(5)
            // decisions
            .with_rule(rule("decided", r"(?:we\s+)?decided\s+(?:to\s+)?(.+)", Decision, High))
            .with_rule(rule("decision_is", r"(?:the\s+)?decision\s+is\s+(?:to\s+)?(.+)", Decision, High))
            .with_rule(rule(
                "go_with",
                r"(?:let'?s|we\s+should|we\s+will|we'?ll)\s+(?:go\s+with\s+|use\s+|adopt\s+)(.+)",
                Decision,
                Medium,
            ))
            .with_rule(rule("going_with", r"(?:I'?m\s+going\s+with|going\s+with|choosing)\s+(.+)", Decision, Medium))
            .with_rule(
                CueRule::new("chose_over", r"\bchose\s+(\S+)\s+over\s+(\S+)", Decision, Medium)
                    .with_title("$1 over $2"),
            )
            // preferences
            .with_rule(rule("i_prefer", r"I\s+prefer\s+(.+)", Preference, High))
            .with_rule(rule(
                "always",
                r"(?:let'?s|we\s+should)\s+(?:always|prefer|stick\s+with|keep)\s+(.+)",
                Preference,
                Medium,
            ))
            .with_rule(rule("convention", r"(?:convention|standard|style):\s*(.+)", Preference, Medium))
            .with_rule(
                CueRule::new(
                    "use_over",
                    r"(?:use|prefer)\s+(\S+)\s+(?:over|instead\s+of)\s+(\S+)",
                    Preference,
                    Medium,
                )
                .with_title("$1 over $2"),
            )
            // goals
            .with_rule(rule("goal", r"(?:the\s+)?goal\s+(?:is\s+)?(?:to\s+)?(.+)", Goal, High))
            .with_rule(rule("need_to", r"we\s+(?:need|want|aim|plan)\s+to\s+(.+)", Goal, Medium))
            .with_rule(rule("todo", r"(?:TODO|FIXME|HACK):\s*(.+)", Goal, Medium))
            .with_rule(rule("next_step", r"next\s+(?:step|priority|milestone):\s*(.+)", Goal, Medium))
            // facts
            .with_rule(rule("turns_out", r"(?:it\s+)?turns?\s+out\s+(?:that\s+)?(.+)", Fact, Medium))
            .with_rule(rule("note", r"(?:TIL|FYI|note|important):\s*(.+)", Fact, Medium))
            .with_rule(rule(
                "service_fact",
                r"(?:the\s+)?(?:API|endpoint|service|server)\s+(?:is|uses|runs|supports)\s+(.+)",
                Fact,
                Medium,
            ))
            .with_rule(rule("root_cause", r"root\s+cause\s+(?:is|was)?:?\s*(.+)", Observation, Medium))
            // risks
            .with_rule(rule("warning", r"(?:risk|warning|careful|watch\s+out|danger):\s*(.+)", Risk, High))
            .with_rule(rule("might_break", r"(?:this\s+)?(?:might|could|may)\s+(?:break|fail|cause)\s+(.+)", Risk, Medium))
            // questions
            .with_rule(rule(
                "should_we",
                r"(?:should\s+we|do\s+we\s+need\s+to|how\s+(?:do|should)\s+we)\s+(.+?)\??$",
                Question,
                Medium,
            ))
            .with_rule(rule(
                "open_question",
                r"(?:open\s+question|TBD|to\s+be\s+decided|unresolved)(?:\s*[:\-—]\s*|\s+)(.+)",
                Question,
                Medium,
            ))
            .with_rule(rule("trailing_question", r"^(.+\?)\s*$", Question, Low))
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, span: &str) -> Option<Classification> {
        let mut best: Option<Classification> = None;
        let mut tied_type = false;

        for rule in &self.rules {
            let Some(title) = rule.apply(span) else {
                continue;
            };
            if title.chars().count() < self.min_title_len {
                continue;
            }
            let found = Classification {
                memory_type: rule.memory_type,
                confidence: rule.confidence,
                title,
                rule: rule.name,
            };
            if self.policy == MatchPolicy::FirstMatch {
                return Some(found);
            }
            match best {
                Some(ref current) if found.confidence < current.confidence => {}
                Some(ref current) if found.confidence == current.confidence => {
                    tied_type |= found.memory_type != current.memory_type;
                }
                _ => {
                    tied_type = false;
                    best = Some(found);
                }
            }
        }

        best.map(|mut c| {
            if tied_type {
                c.confidence = Confidence::Low;
            }
            c
        })
    }
}

fn render(template: &str, caps: &Captures<'_>) -> String {
    static GROUP: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let group = GROUP.get_or_init(|| Regex::new(r"\$(\d)").expect("static group pattern"));
    group
        .replace_all(template, |m: &Captures<'_>| {
            let n: usize = m[1].parse().unwrap_or(0);
            let text = caps.get(n).map(|g| g.as_str().trim()).unwrap_or_default();
            if text.is_empty() { "unknown" } else { text }.to_string()
        })
        .into_owned()
}

/// Collapse whitespace, drop a trailing period, cap the length.
pub fn clean_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches('.');
    trimmed.chars().take(MAX_TITLE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(c: &RuleClassifier, span: &str) -> (MemoryType, Confidence, String) {
        let found = c.classify(span).unwrap_or_else(|| panic!("no match for {span:?}"));
        (found.memory_type, found.confidence, found.title)
    }

    #[test]
    fn commit_prefixes() {
        let c = RuleClassifier::commits();
        assert_eq!(classify(&c, "fix(api): crash").0, MemoryType::Observation);
        assert_eq!(classify(&c, "feat: add x").1, Confidence::Medium);
        assert_eq!(classify(&c, "perf(db): batch").0, MemoryType::Decision);
        assert_eq!(classify(&c, "style: fmt").0, MemoryType::Preference);
        assert!(c.classify("update readme").is_none());
    }

    #[test]
    fn breaking_change_in_body_wins() {
        let c = RuleClassifier::commits();
        let (t, conf, _) = classify(&c, "feat: new api\n\nBREAKING CHANGE: drops v1");
        assert_eq!((t, conf), (MemoryType::Risk, Confidence::High));
    }

    #[test]
    fn commit_lexical_cues() {
        let c = RuleClassifier::commits();
        let found = c.classify("Tune pool\n\nroot cause was a leaked handle").unwrap();
        assert_eq!(found.rule, "root_cause");
    }

    #[test]
    fn commit_question_cues() {
        let c = RuleClassifier::commits();
        let found = c.classify("Pin tokio for now\n\nUnresolved: whether 1.38 fixes the hang").unwrap();
        assert_eq!((found.memory_type, found.rule), (MemoryType::Question, "open_question"));

        let (t, conf, title) = classify(&c, "Should we drop the v1 API?\n\nClients still call it.");
        assert_eq!((t, conf), (MemoryType::Question, Confidence::Low));
        assert_eq!(title, "Should we drop the v1 API?");

        // Conventional prefixes still take precedence.
        assert_eq!(classify(&c, "fix: retry on 503? yes").0, MemoryType::Observation);
    }

    #[test]
    fn log_compiler_error_is_not_a_test_failure() {
        let c = RuleClassifier::logs();
        let (_, _, title) = classify(&c, "src/main.c:42:7: error: expected ';'");
        assert_eq!(title, "Build error in src/main.c:42");
    }

    #[test]
    fn log_templates_fill_unknown() {
        let c = RuleClassifier::logs();
        assert_eq!(classify(&c, "job timed out").2, "Timeout: unknown");
        assert_eq!(
            classify(&c, "FAILED tests/test_api.py::test_port - assert 1 == 2").2,
            "Test failure: tests/test_api.py::test_port"
        );
        assert_eq!(classify(&c, "FAIL: test_login - bad token").2, "CI test failure: login");
        let (t, conf, _) = classify(&c, "DeprecationWarning: imp is deprecated");
        assert_eq!((t, conf), (MemoryType::Risk, Confidence::Medium));
    }

    #[test]
    fn transcript_highest_confidence_wins() {
        let c = RuleClassifier::transcripts();
        let (t, conf, title) = classify(&c, "We decided to use Postgres for storage.");
        assert_eq!((t, conf), (MemoryType::Decision, Confidence::High));
        assert_eq!(title, "use Postgres for storage");
    }

    #[test]
    fn transcript_use_over() {
        let c = RuleClassifier::transcripts();
        let (t, _, title) = classify(&c, "we always use tabs over spaces here");
        assert_eq!(t, MemoryType::Preference);
        assert_eq!(title, "tabs over spaces");
    }

    #[test]
    fn transcript_cross_type_tie_is_low_confidence() {
        let c = RuleClassifier::transcripts();
        // goal (high) and decision (high) both fire.
        let found = c.classify("The goal is to ship; we decided to ship Friday").unwrap();
        assert_eq!(found.confidence, Confidence::Low);
    }

    #[test]
    fn trailing_question_mark_is_a_low_confidence_question() {
        let c = RuleClassifier::transcripts();
        let (t, conf, _) = classify(&c, "Is the cache shared across pods?");
        assert_eq!((t, conf), (MemoryType::Question, Confidence::Low));
    }

    #[test]
    fn transcript_open_question_separators() {
        let c = RuleClassifier::transcripts();
        for span in [
            "Unresolved: who owns the retry budget",
            "unresolved - who owns the retry budget",
            "Open question who owns the retry budget",
        ] {
            let (t, _, title) = classify(&c, span);
            assert_eq!(t, MemoryType::Question, "{span}");
            assert_eq!(title, "who owns the retry budget", "{span}");
        }
    }

    #[test]
    fn short_titles_are_ignored() {
        let c = RuleClassifier::transcripts();
        assert!(c.classify("we decided to go").is_none());
    }

    #[test]
    fn clean_title_normalizes() {
        assert_eq!(clean_title("  a   b.  "), "a b");
        assert_eq!(clean_title(&"x".repeat(300)).len(), MAX_TITLE_LEN);
    }
}
