//! Argument quality evaluation.
//!
//! Runs synchronously after every successful turn and produces an
//! [`ArgumentRecord`]: structural analysis, typed evidence items, fallacy
//! findings, and the composite strength score. The deterministic lexical
//! evaluators always run; when an analyzer model is configured its
//! structure refinement is merged in, and a consultation failure yields a
//! degraded record (confidence 0, unknown structure tag) instead of
//! blocking the debate.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::StrengthWeights;
use crate::llm::{ModelClient, ModelId, Prompt};

/// Closed set of evidence types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    /// Numbers, percentages, measured quantities.
    Statistical,
    /// Named authority or practitioner opinion.
    ExpertOpinion,
    /// A concrete worked example.
    CaseStudy,
    /// Argument by analogy.
    Analogical,
    /// Precedent from the past.
    Historical,
    /// Citation of reports, records, documents.
    Documentary,
    /// Deductive or definitional support.
    Logical,
    /// Anything the classifier cannot place.
    Other,
}

/// One detected evidence item with its per-item scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Evidence classification.
    pub kind: EvidenceType,
    /// Sentence the item was detected in.
    pub excerpt: String,
    /// Credibility score in [0, 1].
    pub credibility: f64,
    /// Relevance score in [0, 1].
    pub relevance: f64,
    /// Sufficiency score in [0, 1].
    pub sufficiency: f64,
    /// Recency score in [0, 1].
    pub recency: f64,
}

impl EvidenceItem {
    /// Mean of the four per-item scores.
    #[must_use]
    pub fn composite(&self) -> f64 {
        (self.credibility + self.relevance + self.sufficiency + self.recency) / 4.0
    }
}

/// Closed set of eight logical fallacies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallacy {
    /// Attacking the speaker instead of the argument.
    AdHominem,
    /// Refuting a distorted version of the opponent's claim.
    StrawMan,
    /// Presenting two options as the only ones.
    FalseDichotomy,
    /// Resting a claim solely on authority.
    AppealToAuthority,
    /// Substituting emotion for reasons.
    AppealToEmotion,
    /// Chaining escalating consequences without support.
    SlipperySlope,
    /// Generalising from too few cases.
    HastyGeneralisation,
    /// Assuming the conclusion inside a premise.
    CircularReasoning,
}

impl Fallacy {
    /// A suggested correction for this fallacy class.
    #[must_use]
    pub const fn suggested_correction(self) -> &'static str {
        match self {
            Self::AdHominem => "address the argument rather than the arguer",
            Self::StrawMan => "restate the opponent's actual position before rebutting",
            Self::FalseDichotomy => "acknowledge the options between the two extremes",
            Self::AppealToAuthority => "support the authority's view with independent evidence",
            Self::AppealToEmotion => "ground the emotional appeal in verifiable facts",
            Self::SlipperySlope => "justify each step of the causal chain",
            Self::HastyGeneralisation => "widen the sample before generalising",
            Self::CircularReasoning => "supply a premise independent of the conclusion",
        }
    }
}

/// Severity of a fallacy finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallacySeverity {
    /// Minor slip, argument survives.
    Low,
    /// Weakens the argument noticeably.
    Medium,
    /// Undermines the argument.
    High,
}

/// One fallacy finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallacyFinding {
    /// Fallacy class.
    pub kind: Fallacy,
    /// Severity.
    pub severity: FallacySeverity,
    /// Sentence the cue was detected in.
    pub excerpt: String,
    /// Suggested correction.
    pub correction: String,
}

/// Structure tag summarising the reasoning form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StructureTag {
    /// Premises entail the conclusion.
    Deductive,
    /// Conclusion generalises from instances.
    Inductive,
    /// Conclusion rests on a causal claim.
    Causal,
    /// Conclusion rests on comparison.
    Comparative,
    /// Could not be determined (degraded analysis).
    #[default]
    Unknown,
}

/// Extracted argument structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgumentStructure {
    /// Premise sentences.
    pub premises: Vec<String>,
    /// Concluding sentence, if one was found.
    pub conclusion: Option<String>,
    /// Connective phrases forming the reasoning path.
    pub reasoning_path: Vec<String>,
    /// Reasoning form.
    pub tag: StructureTag,
}

/// Full per-turn analysis record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentRecord {
    /// Extracted structure.
    pub structure: ArgumentStructure,
    /// Detected evidence items.
    pub evidence: Vec<EvidenceItem>,
    /// Detected fallacies.
    pub fallacies: Vec<FallacyFinding>,
    /// Structural component score in [0, 1].
    pub structure_score: f64,
    /// Evidentiary component score in [0, 1]; 0 when no evidence found.
    pub evidence_score: f64,
    /// Logical component score in [0, 1].
    pub logic_score: f64,
    /// Composite strength in [0, 1].
    pub strength: f64,
    /// Analyzer confidence in [0, 1]; 0 on degraded records.
    pub confidence: f64,
    /// True when the model consultation failed and only the lexical
    /// evaluators contributed.
    pub degraded: bool,
}

impl ArgumentRecord {
    /// A fully degraded record: unknown structure, zero scores, zero
    /// confidence. Used when analysis cannot run at all.
    #[must_use]
    pub fn degraded() -> Self {
        Self {
            structure: ArgumentStructure::default(),
            evidence: Vec::new(),
            fallacies: Vec::new(),
            structure_score: 0.0,
            evidence_score: 0.0,
            logic_score: 0.0,
            strength: 0.0,
            confidence: 0.0,
            degraded: true,
        }
    }
}

/// Structure refinement returned by the analyzer model.
#[derive(Debug, Deserialize)]
struct ConsultedStructure {
    #[serde(default)]
    premises: Vec<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    structure_score: Option<f64>,
}

/// Per-turn argument analyzer.
///
/// Cheap to clone; holds only configuration and an optional consultation
/// client.
#[derive(Clone)]
pub struct ArgumentAnalyzer {
    weights: StrengthWeights,
    /// Optional analyzer model. Its breaker identity is this logical
    /// model id, never a debater's.
    consult: Option<(Arc<dyn ModelClient>, ModelId)>,
    consult_deadline: Duration,
}

impl std::fmt::Debug for ArgumentAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentAnalyzer")
            .field("weights", &self.weights)
            .field("consults_model", &self.consult.is_some())
            .finish()
    }
}

impl ArgumentAnalyzer {
    /// Create a lexical-only analyzer.
    #[must_use]
    pub fn new(weights: StrengthWeights) -> Self {
        Self {
            weights,
            consult: None,
            consult_deadline: Duration::from_secs(20),
        }
    }

    /// Attach an analyzer model for structure refinement.
    #[must_use]
    pub fn with_consultation(mut self, client: Arc<dyn ModelClient>, model: ModelId) -> Self {
        self.consult = Some((client, model));
        self
    }

    /// Analyze one turn's content against the session topic.
    ///
    /// Never fails: consultation errors degrade the record instead.
    pub async fn analyze(&self, content: &str, topic: &str) -> ArgumentRecord {
        let sentences = split_sentences(content);
        let mut structure = extract_structure(&sentences);
        let evidence = detect_evidence(&sentences, topic);
        let fallacies = detect_fallacies(&sentences);

        let mut structure_score = score_structure(&structure, &sentences);
        let evidence_score = score_evidence(&evidence);
        let logic_score = score_logic(&fallacies);

        let mut confidence = lexical_confidence(&sentences);
        let mut degraded = false;

        if let Some((client, model)) = &self.consult {
            match self.consult_structure(client.as_ref(), model, content).await {
                Ok(consulted) => {
                    if !consulted.premises.is_empty() {
                        structure.premises = consulted.premises;
                    }
                    if consulted.conclusion.is_some() {
                        structure.conclusion = consulted.conclusion;
                    }
                    if let Some(tag) = consulted.tag.as_deref().and_then(parse_tag) {
                        structure.tag = tag;
                    }
                    if let Some(score) = consulted.structure_score {
                        structure_score = score.clamp(0.0, 1.0);
                    }
                    confidence = (confidence + 0.25).min(1.0);
                }
                Err(reason) => {
                    tracing::warn!(
                        model = %model,
                        reason = %reason,
                        "Analyzer consultation failed, returning degraded record"
                    );
                    structure.tag = StructureTag::Unknown;
                    confidence = 0.0;
                    degraded = true;
                }
            }
        }

        let strength = self
            .weights
            .compose(structure_score, evidence_score, logic_score);

        ArgumentRecord {
            structure,
            evidence,
            fallacies,
            structure_score,
            evidence_score,
            logic_score,
            strength,
            confidence,
            degraded,
        }
    }

    async fn consult_structure(
        &self,
        client: &dyn ModelClient,
        model: &ModelId,
        content: &str,
    ) -> Result<ConsultedStructure, String> {
        let prompt = Prompt::new(
            "You extract argument structure. Respond with JSON only: \
             {\"premises\": [..], \"conclusion\": \"..\", \
             \"tag\": \"deductive|inductive|causal|comparative\", \
             \"structure_score\": 0.0}",
            format!("Argument:\n{content}"),
        )
        .with_temperature(0.2)
        .with_max_tokens(512);

        let completion = client
            .invoke(model, &prompt, self.consult_deadline)
            .await
            .map_err(|e| e.to_string())?;

        serde_json::from_str(extract_json(&completion.text)).map_err(|e| e.to_string())
    }
}

fn parse_tag(raw: &str) -> Option<StructureTag> {
    match raw {
        "deductive" => Some(StructureTag::Deductive),
        "inductive" => Some(StructureTag::Inductive),
        "causal" => Some(StructureTag::Causal),
        "comparative" => Some(StructureTag::Comparative),
        _ => None,
    }
}

/// Trim a completion down to its outermost JSON object, tolerating code
/// fences and prose around it.
fn extract_json(text: &str) -> &str {
    let start = text.find('{').unwrap_or(0);
    let end = text.rfind('}').map_or(text.len(), |i| i + 1);
    text.get(start..end).unwrap_or(text)
}

/// Sentence split on terminal punctuation.
fn split_sentences(content: &str) -> Vec<String> {
    content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

const PREMISE_CUES: &[&str] = &["because", "since", "given that", "as shown", "considering"];
const CONCLUSION_CUES: &[&str] = &[
    "therefore",
    "thus",
    "hence",
    "consequently",
    "in conclusion",
    "it follows",
    "this shows",
];
const CAUSAL_CUES: &[&str] = &["causes", "leads to", "results in", "drives", "produces"];
const COMPARATIVE_CUES: &[&str] = &["compared to", "relative to", "more than", "less than"];
const INDUCTIVE_CUES: &[&str] = &["in most cases", "typically", "generally", "tend to"];

fn extract_structure(sentences: &[String]) -> ArgumentStructure {
    let mut premises = Vec::new();
    let mut conclusion = None;
    let mut reasoning_path = Vec::new();

    for sentence in sentences {
        let lower = sentence.to_lowercase();
        if let Some(cue) = CONCLUSION_CUES.iter().find(|c| lower.contains(*c)) {
            conclusion = Some(sentence.clone());
            reasoning_path.push((*cue).to_string());
        } else if let Some(cue) = PREMISE_CUES.iter().find(|c| lower.contains(*c)) {
            premises.push(sentence.clone());
            reasoning_path.push((*cue).to_string());
        }
    }

    // Fall back to positional structure: last sentence concludes.
    if conclusion.is_none() && sentences.len() >= 2 {
        conclusion = sentences.last().cloned();
    }
    if premises.is_empty() && !sentences.is_empty() {
        premises.push(sentences[0].clone());
    }

    let joined = sentences.join(" ").to_lowercase();
    let tag = if CAUSAL_CUES.iter().any(|c| joined.contains(c)) {
        StructureTag::Causal
    } else if COMPARATIVE_CUES.iter().any(|c| joined.contains(c)) {
        StructureTag::Comparative
    } else if INDUCTIVE_CUES.iter().any(|c| joined.contains(c)) {
        StructureTag::Inductive
    } else if !reasoning_path.is_empty() {
        StructureTag::Deductive
    } else {
        StructureTag::Unknown
    };

    ArgumentStructure {
        premises,
        conclusion,
        reasoning_path,
        tag,
    }
}

fn evidence_cues() -> &'static [(EvidenceType, &'static [&'static str])] {
    &[
        (
            EvidenceType::Statistical,
            &["percent", "%", "survey", "rate of", "on average", "statistics"],
        ),
        (
            EvidenceType::ExpertOpinion,
            &["according to", "experts", "researchers at", "economist", "analyst"],
        ),
        (
            EvidenceType::CaseStudy,
            &["case study", "for instance", "for example", "pilot program"],
        ),
        (
            EvidenceType::Analogical,
            &["similar to", "analogous", "just as", "much like"],
        ),
        (
            EvidenceType::Historical,
            &["historically", "in the past", "decade", "precedent"],
        ),
        (
            EvidenceType::Documentary,
            &["report", "documented", "records show", "audit", "whitepaper"],
        ),
        (
            EvidenceType::Logical,
            &["by definition", "necessarily", "it follows that", "entails"],
        ),
    ]
}

fn detect_evidence(sentences: &[String], topic: &str) -> Vec<EvidenceItem> {
    let mut items = Vec::new();

    for sentence in sentences {
        let lower = sentence.to_lowercase();
        let Some(kind) = evidence_cues()
            .iter()
            .find(|(_, cues)| cues.iter().any(|c| lower.contains(c)))
            .map(|(kind, _)| *kind)
        else {
            continue;
        };

        let has_digits = sentence.chars().any(|c| c.is_ascii_digit());
        let relevance = super::similarity::overlap_ratio(sentence, topic)
            .mul_add(2.0, 0.3)
            .clamp(0.0, 1.0);
        let credibility = match kind {
            EvidenceType::Statistical | EvidenceType::Documentary => {
                if has_digits {
                    0.8
                } else {
                    0.55
                }
            }
            EvidenceType::ExpertOpinion | EvidenceType::Historical => 0.65,
            EvidenceType::Logical => 0.7,
            _ => 0.5,
        };
        let sufficiency = (sentence.split_whitespace().count() as f64 / 25.0).clamp(0.2, 0.9);
        let recency = if lower.contains("recent") || lower.contains("last year") {
            0.9
        } else if matches!(kind, EvidenceType::Historical) {
            0.3
        } else {
            0.5
        };

        items.push(EvidenceItem {
            kind,
            excerpt: sentence.clone(),
            credibility,
            relevance,
            sufficiency,
            recency,
        });
    }

    items
}

fn fallacy_cues() -> &'static [(Fallacy, &'static [&'static str])] {
    &[
        (
            Fallacy::AdHominem,
            &["my opponent is a", "too naive", "incompetent", "dishonest person"],
        ),
        (
            Fallacy::StrawMan,
            &["so you are saying", "apparently they want", "they claim we should just"],
        ),
        (
            Fallacy::FalseDichotomy,
            &["either we", "the only alternative", "there are only two"],
        ),
        (
            Fallacy::AppealToAuthority,
            &["must be true because", "the authorities say", "as the ceo says"],
        ),
        (
            Fallacy::AppealToEmotion,
            &["think of the children", "terrifying", "heartbreaking", "outrageous"],
        ),
        (
            Fallacy::SlipperySlope,
            &["will inevitably lead", "before long we will", "next thing you know"],
        ),
        (
            Fallacy::HastyGeneralisation,
            &["everyone knows", "all customers", "always fails", "never works"],
        ),
        (
            Fallacy::CircularReasoning,
            &["true because it is", "by its very nature proves"],
        ),
    ]
}

fn detect_fallacies(sentences: &[String]) -> Vec<FallacyFinding> {
    let mut findings = Vec::new();

    for sentence in sentences {
        let lower = sentence.to_lowercase();
        for (kind, cues) in fallacy_cues() {
            let hits = cues.iter().filter(|c| lower.contains(*c)).count();
            if hits == 0 {
                continue;
            }
            let severity = if hits > 1 {
                FallacySeverity::High
            } else if sentence.split_whitespace().count() < 12 {
                FallacySeverity::Medium
            } else {
                FallacySeverity::Low
            };
            findings.push(FallacyFinding {
                kind: *kind,
                severity,
                excerpt: sentence.clone(),
                correction: kind.suggested_correction().to_string(),
            });
        }
    }

    findings
}

fn score_structure(structure: &ArgumentStructure, sentences: &[String]) -> f64 {
    if sentences.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 0.2;
    if !structure.premises.is_empty() {
        score += 0.25;
    }
    if structure.conclusion.is_some() {
        score += 0.25;
    }
    if !structure.reasoning_path.is_empty() {
        score += 0.2;
    }
    // Reward developed arguments, lightly.
    score += (sentences.len() as f64 / 12.0).min(0.1);
    score.clamp(0.0, 1.0)
}

fn score_evidence(evidence: &[EvidenceItem]) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean: f64 = evidence.iter().map(EvidenceItem::composite).sum::<f64>() / evidence.len() as f64;
    // Two solid items saturate the quantity factor.
    let quantity = (evidence.len() as f64 / 2.0).min(1.0);
    (mean * 0.7 + quantity * 0.3).clamp(0.0, 1.0)
}

fn score_logic(fallacies: &[FallacyFinding]) -> f64 {
    let penalty: f64 = fallacies
        .iter()
        .map(|f| match f.severity {
            FallacySeverity::Low => 0.08,
            FallacySeverity::Medium => 0.18,
            FallacySeverity::High => 0.35,
        })
        .sum();
    (0.85 - penalty).clamp(0.0, 1.0)
}

fn lexical_confidence(sentences: &[String]) -> f64 {
    // Confidence grows with material to analyze, saturating at 8 sentences.
    (sentences.len() as f64 / 8.0).clamp(0.1, 0.75)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> ArgumentAnalyzer {
        ArgumentAnalyzer::new(StrengthWeights::default())
    }

    const STRONG_ARGUMENT: &str = "Support costs rose 40 percent in the last year, \
        according to the annual operations report. Because automated triage resolves \
        routine tickets in seconds, response times fall sharply. A case study from our \
        pilot program documented a 30 percent satisfaction gain. Therefore adopting AI \
        support reduces cost while improving outcomes.";

    const WEAK_ARGUMENT: &str = "Everyone knows automation always fails. \
        Either we keep humans or we lose every customer. Think of the children.";

    #[tokio::test]
    async fn test_strong_argument_scores_high() {
        let record = analyzer().analyze(STRONG_ARGUMENT, "Adopt AI customer support").await;

        assert!(!record.evidence.is_empty());
        assert!(record.fallacies.is_empty());
        assert!(record.strength > 0.5, "strength was {}", record.strength);
        assert!(record.structure.conclusion.is_some());
        assert!(!record.degraded);
    }

    #[tokio::test]
    async fn test_weak_argument_scores_low() {
        let strong = analyzer().analyze(STRONG_ARGUMENT, "Adopt AI customer support").await;
        let weak = analyzer().analyze(WEAK_ARGUMENT, "Adopt AI customer support").await;

        assert!(weak.strength < strong.strength);
        assert!(weak.fallacies.len() >= 2);
    }

    #[tokio::test]
    async fn test_strength_stays_in_unit_interval() {
        for content in [STRONG_ARGUMENT, WEAK_ARGUMENT, "", "short"] {
            let record = analyzer().analyze(content, "topic").await;
            assert!((0.0..=1.0).contains(&record.strength));
        }
    }

    #[tokio::test]
    async fn test_empty_evidence_zeroes_component() {
        let record = analyzer()
            .analyze("I simply feel this is right", "topic")
            .await;
        assert!(record.evidence.is_empty());
        assert!(record.evidence_score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_degraded_record_shape() {
        let record = ArgumentRecord::degraded();
        assert!(record.degraded);
        assert!(record.confidence.abs() < f64::EPSILON);
        assert_eq!(record.structure.tag, StructureTag::Unknown);
    }

    #[test]
    fn test_fallacy_detection_cues() {
        let sentences = split_sentences(
            "Everyone knows this always fails. Either we adopt it or we go bankrupt.",
        );
        let findings = detect_fallacies(&sentences);
        let kinds: Vec<Fallacy> = findings.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&Fallacy::HastyGeneralisation));
        assert!(kinds.contains(&Fallacy::FalseDichotomy));
        for finding in &findings {
            assert!(!finding.correction.is_empty());
        }
    }

    #[test]
    fn test_evidence_typing() {
        let sentences =
            split_sentences("Adoption rose 25 percent last quarter. According to researchers at the institute, quality held steady.");
        let items = detect_evidence(&sentences, "adoption quality");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, EvidenceType::Statistical);
        assert_eq!(items[1].kind, EvidenceType::ExpertOpinion);
    }

    #[test]
    fn test_extract_json_tolerates_fences() {
        let wrapped = "Here you go:\n```json\n{\"premises\": []}\n```";
        assert_eq!(extract_json(wrapped), "{\"premises\": []}");
    }

    struct FailingClient;

    #[async_trait::async_trait]
    impl ModelClient for FailingClient {
        async fn invoke(
            &self,
            model: &ModelId,
            _prompt: &Prompt,
            _deadline: Duration,
        ) -> Result<crate::llm::Completion, crate::error::InvokeError> {
            Err(crate::error::InvokeError::new(
                crate::error::FailureKind::Unavailable,
                model.clone(),
                "down",
            ))
        }
    }

    #[tokio::test]
    async fn test_consultation_failure_degrades() {
        let analyzer = ArgumentAnalyzer::new(StrengthWeights::default())
            .with_consultation(Arc::new(FailingClient), "analyzer-model".to_string());

        let record = analyzer.analyze(STRONG_ARGUMENT, "topic").await;
        assert!(record.degraded);
        assert!(record.confidence.abs() < f64::EPSILON);
        assert_eq!(record.structure.tag, StructureTag::Unknown);
        // The lexical evaluators still contribute a bounded strength.
        assert!((0.0..=1.0).contains(&record.strength));
    }
}
