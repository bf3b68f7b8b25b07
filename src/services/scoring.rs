use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::core::metrics;
use crate::db::models::{AnswerOutcome, AnswerResult, Question, Quiz};
use crate::db::types::QuestionKind;
use crate::services::judge::{EssayJudge, JudgeError, JudgeRequest};

pub(crate) const JUDGE_FALLBACK_FEEDBACK: &str =
    "Automatic feedback is unavailable for this answer; it was awarded 0 points pending review.";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawAnswer {
    pub(crate) question_id: String,
    pub(crate) answer: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ScoredAttempt {
    /// In quiz question order.
    pub(crate) results: Vec<AnswerResult>,
    /// Rounded and clamped to 0..=100.
    pub(crate) score: i32,
}

#[derive(Clone)]
pub(crate) struct ScoringEngine {
    judge: Arc<dyn EssayJudge>,
    judge_timeout: Duration,
}

impl ScoringEngine {
    pub(crate) fn new(judge: Arc<dyn EssayJudge>, judge_timeout: Duration) -> Self {
        Self { judge, judge_timeout }
    }

    /// Scores raw answers against the quiz. Answers for unknown questions and
    /// repeated answers for the same question are dropped; the first one wins.
    /// Essay judge failures are absorbed per question.
    pub(crate) async fn score(&self, quiz: &Quiz, answers: &[RawAnswer]) -> ScoredAttempt {
        let questions = &quiz.questions.0;
        let weight = question_weight(questions.len());

        let mut by_question: HashMap<&str, &str> = HashMap::with_capacity(answers.len());
        for raw in answers {
            by_question.entry(raw.question_id.as_str()).or_insert(raw.answer.as_str());
        }

        let mut results = Vec::with_capacity(by_question.len());
        let mut total = 0.0_f64;

        // Sequential on purpose: one judge call in flight per submission.
        for question in questions {
            let Some(answer) = by_question.get(question.id.as_str()) else {
                continue;
            };

            let result = match question.kind {
                QuestionKind::MultipleChoice => score_choice(question, answer, weight),
                QuestionKind::Essay => self.score_essay(quiz, question, answer, weight).await,
            };
            total += result.points;
            results.push(result);
        }

        ScoredAttempt { results, score: aggregate(total) }
    }

    async fn score_essay(
        &self,
        quiz: &Quiz,
        question: &Question,
        answer: &str,
        weight: f64,
    ) -> AnswerResult {
        let request = JudgeRequest {
            question: question.prompt.clone(),
            rubric: question.grading_reference.clone(),
            answer: answer.to_string(),
            max_points: weight.round(),
        };

        let timer = Instant::now();
        let verdict = match tokio::time::timeout(self.judge_timeout, self.judge.judge(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                metrics::judge_call("timeout", timer.elapsed().as_secs_f64());
                Err(JudgeError::Timeout)
            }
        };

        let (points, feedback) = match verdict {
            Ok(verdict) => (verdict.score.clamp(0.0, weight), verdict.feedback),
            Err(err) => {
                tracing::warn!(
                    quiz_id = %quiz.id,
                    question_id = %question.id,
                    error = %err,
                    "Essay judge failed; using fallback score"
                );
                (0.0, JUDGE_FALLBACK_FEEDBACK.to_string())
            }
        };

        AnswerResult {
            question_id: question.id.clone(),
            answer: answer.to_string(),
            points,
            outcome: AnswerOutcome::Essay { feedback: Some(feedback) },
        }
    }
}

pub(crate) fn question_weight(question_count: usize) -> f64 {
    if question_count == 0 {
        0.0
    } else {
        100.0 / question_count as f64
    }
}

fn score_choice(question: &Question, answer: &str, weight: f64) -> AnswerResult {
    let correct = answers_match(answer, &question.grading_reference);
    AnswerResult {
        question_id: question.id.clone(),
        answer: answer.to_string(),
        points: if correct { weight } else { 0.0 },
        outcome: AnswerOutcome::MultipleChoice { correct },
    }
}

pub(crate) fn answers_match(answer: &str, reference: &str) -> bool {
    answer.trim().to_lowercase() == reference.trim().to_lowercase()
}

fn aggregate(total: f64) -> i32 {
    // Clamped before the cast, so it cannot overflow.
    total.round().clamp(0.0, 100.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::judge::JudgeVerdict;
    use crate::test_support::{answer, choice, essay, quiz_with, HangingJudge, ScriptedJudge};

    fn engine(judge: Arc<dyn EssayJudge>) -> ScoringEngine {
        ScoringEngine::new(judge, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn four_correct_choices_score_twenty_five_each() {
        let quiz = quiz_with(vec![
            choice("q1", "A"),
            choice("q2", "B"),
            choice("q3", "C"),
            choice("q4", "D"),
        ]);
        let answers = vec![answer("q1", "A"), answer("q2", "B"), answer("q3", "C"), answer("q4", "D")];

        let scored = engine(Arc::new(ScriptedJudge::default())).score(&quiz, &answers).await;

        assert_eq!(scored.score, 100);
        assert!(scored.results.iter().all(|r| r.points == 25.0 && r.correct() == Some(true)));
    }

    #[tokio::test]
    async fn choice_match_ignores_case_and_surrounding_space() {
        let quiz = quiz_with(vec![choice("q1", "Paris"), choice("q2", "Rome")]);
        let answers = vec![answer("q1", " paris "), answer("q2", "Milan")];

        let scored = engine(Arc::new(ScriptedJudge::default())).score(&quiz, &answers).await;

        assert_eq!(scored.score, 50);
        assert_eq!(scored.results[0].correct(), Some(true));
        assert_eq!(scored.results[1].correct(), Some(false));
        assert_eq!(scored.results[1].points, 0.0);
    }

    #[tokio::test]
    async fn essay_score_is_capped_at_question_weight() {
        let judge = Arc::new(ScriptedJudge::new(vec![Ok(JudgeVerdict {
            score: 90.0,
            feedback: "Excellent".to_string(),
        })]));
        let quiz = quiz_with(vec![choice("q1", "A"), essay("q2", "Explain")]);

        let scored =
            engine(judge.clone()).score(&quiz, &[answer("q2", "Because reasons")]).await;

        assert_eq!(scored.results.len(), 1);
        assert_eq!(scored.results[0].points, 50.0);
        assert_eq!(scored.results[0].feedback(), Some("Excellent"));
        assert_eq!(scored.results[0].correct(), None);
        assert_eq!(scored.score, 50);

        let requests = judge.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_points, 50.0);
        assert_eq!(requests[0].rubric, "Explain");
    }

    #[tokio::test]
    async fn negative_essay_score_is_floored_at_zero() {
        let judge = Arc::new(ScriptedJudge::new(vec![Ok(JudgeVerdict {
            score: -5.0,
            feedback: "Off topic".to_string(),
        })]));
        let quiz = quiz_with(vec![essay("q1", "Explain")]);

        let scored = engine(judge).score(&quiz, &[answer("q1", "Unrelated")]).await;

        assert_eq!(scored.results[0].points, 0.0);
        assert_eq!(scored.score, 0);
    }

    #[tokio::test]
    async fn judge_failure_only_affects_its_own_question() {
        let judge = Arc::new(ScriptedJudge::new(vec![Err(JudgeError::Http("boom".to_string()))]));
        let quiz = quiz_with(vec![choice("q1", "A"), essay("q2", "Explain")]);

        let scored =
            engine(judge).score(&quiz, &[answer("q1", "a"), answer("q2", "Some essay")]).await;

        assert_eq!(scored.score, 50);
        assert_eq!(scored.results[1].points, 0.0);
        assert_eq!(scored.results[1].feedback(), Some(JUDGE_FALLBACK_FEEDBACK));
        assert_eq!(scored.results[1].correct(), None);
    }

    #[tokio::test]
    async fn slow_judge_is_treated_as_failure() {
        let quiz = quiz_with(vec![essay("q1", "Explain")]);
        let engine = ScoringEngine::new(Arc::new(HangingJudge), Duration::from_millis(20));

        let scored = engine.score(&quiz, &[answer("q1", "Eventually")]).await;

        assert_eq!(scored.score, 0);
        assert_eq!(scored.results[0].feedback(), Some(JUDGE_FALLBACK_FEEDBACK));
    }

    #[tokio::test]
    async fn unknown_and_duplicate_answers_are_dropped_and_order_follows_quiz() {
        let quiz = quiz_with(vec![choice("q1", "A"), choice("q2", "B")]);
        let answers = vec![
            answer("q2", "B"),
            answer("ghost", "A"),
            answer("q1", "wrong"),
            answer("q1", "A"),
        ];

        let scored = engine(Arc::new(ScriptedJudge::default())).score(&quiz, &answers).await;

        let ids: Vec<&str> = scored.results.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2"]);
        assert_eq!(scored.results[0].correct(), Some(false));
        assert_eq!(scored.score, 50);
    }

    #[tokio::test]
    async fn unanswered_questions_still_count_towards_weight() {
        let quiz = quiz_with(vec![choice("q1", "A"), choice("q2", "B"), choice("q3", "C")]);

        let scored =
            engine(Arc::new(ScriptedJudge::default())).score(&quiz, &[answer("q1", "A")]).await;

        assert_eq!(scored.results.len(), 1);
        assert_eq!(scored.score, 33);
    }

    #[tokio::test]
    async fn empty_quiz_scores_zero() {
        let quiz = quiz_with(Vec::new());

        let scored =
            engine(Arc::new(ScriptedJudge::default())).score(&quiz, &[answer("q1", "A")]).await;

        assert!(scored.results.is_empty());
        assert_eq!(scored.score, 0);
        assert_eq!(question_weight(0), 0.0);
    }
}
