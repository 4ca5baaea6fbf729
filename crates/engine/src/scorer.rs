//! Heuristic opportunity scorer.
//!
//! `score = (technical*w_t + news*w_n + social*w_s + bonus) * successful_layers / 3`,
//! clamped to `[min_score, max_score]`. `bonus` is `confluence_bonus * layers_positive`
//! when at least two layers clear their positive threshold. Weights and
//! thresholds live in [`ScoringPolicy`]; they are a policy, not a model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub technical_weight: f64,
    pub news_weight: f64,
    pub social_weight: f64,
    /// Points per positive layer when two or more agree
    pub confluence_bonus: f64,
    pub technical_positive: f64,
    pub news_positive: f64,
    pub social_positive: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Returned when every data source failed
    pub neutral_score: f64,
    /// Alert threshold used by the market scanner
    pub min_opportunity_score: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            technical_weight: 0.4,
            news_weight: 0.3,
            social_weight: 0.2,
            confluence_bonus: 10.0,
            technical_positive: 15.0,
            news_positive: 10.0,
            social_positive: 5.0,
            min_score: 15.0,
            max_score: 85.0,
            neutral_score: 25.0,
            min_opportunity_score: 50.0,
        }
    }
}

/// Sub-scores for one symbol; `None` marks a layer whose source failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub technical: Option<f64>,
    pub news: Option<f64>,
    pub social: Option<f64>,
}

impl SubScores {
    pub fn all(technical: f64, news: f64, social: f64) -> Self {
        Self {
            technical: Some(technical),
            news: Some(news),
            social: Some(social),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub weighted: f64,
    pub bonus: f64,
    pub layers_positive: u8,
    pub successful_layers: u8,
}

impl ScoringPolicy {
    /// Reject non-finite parameters and inverted score bounds
    pub fn validate(&self) -> anyhow::Result<()> {
        let params = [
            self.technical_weight,
            self.news_weight,
            self.social_weight,
            self.confluence_bonus,
            self.technical_positive,
            self.news_positive,
            self.social_positive,
            self.min_score,
            self.max_score,
            self.neutral_score,
            self.min_opportunity_score,
        ];
        anyhow::ensure!(
            params.iter().all(|v| v.is_finite()),
            "scoring policy has a non-finite parameter"
        );
        anyhow::ensure!(
            self.min_score <= self.max_score,
            "scoring policy min_score {} exceeds max_score {}",
            self.min_score,
            self.max_score
        );
        Ok(())
    }

    /// Score with all three layers present
    pub fn score(&self, technical: f64, news: f64, social: f64) -> f64 {
        self.score_layers(&SubScores::all(technical, news, social)).score
    }

    pub fn score_layers(&self, subs: &SubScores) -> ScoreBreakdown {
        // Non-finite values count as a failed layer
        let clean = |v: Option<f64>| v.filter(|x| x.is_finite());
        let technical = clean(subs.technical);
        let news = clean(subs.news);
        let social = clean(subs.social);

        let successful_layers = [technical, news, social]
            .iter()
            .filter(|v| v.is_some())
            .count() as u8;

        if successful_layers == 0 {
            return ScoreBreakdown {
                score: self.neutral_score,
                weighted: 0.0,
                bonus: 0.0,
                layers_positive: 0,
                successful_layers: 0,
            };
        }

        let t = technical.unwrap_or(0.0);
        let n = news.unwrap_or(0.0);
        let s = social.unwrap_or(0.0);

        let weighted = t * self.technical_weight + n * self.news_weight + s * self.social_weight;

        let layers_positive = [
            t > self.technical_positive,
            n > self.news_positive,
            s > self.social_positive,
        ]
        .iter()
        .filter(|p| **p)
        .count() as u8;

        let bonus = if layers_positive >= 2 {
            self.confluence_bonus * f64::from(layers_positive)
        } else {
            0.0
        };

        let raw = (weighted + bonus) * f64::from(successful_layers) / 3.0;

        ScoreBreakdown {
            // max/min instead of clamp: no panic when min_score > max_score
            score: raw.max(self.min_score).min(self.max_score),
            weighted,
            bonus,
            layers_positive,
            successful_layers,
        }
    }

    pub fn is_opportunity(&self, score: f64) -> bool {
        score >= self.min_opportunity_score
    }
}

/// Social sub-score from a 0..1 momentum reading: `min(20, momentum * 20)`
pub fn social_score(momentum: f64) -> f64 {
    if !momentum.is_finite() {
        return 0.0;
    }
    (momentum.max(0.0) * 20.0).min(20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        assert!(ScoringPolicy::default().validate().is_ok());

        let inverted = ScoringPolicy {
            min_score: 90.0,
            max_score: 10.0,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
        // Scoring still must not panic
        assert_eq!(inverted.score(40.0, 30.0, 20.0), 10.0);

        let nan = ScoringPolicy {
            news_weight: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_documented_constants() {
        let p = ScoringPolicy::default();
        assert_eq!(p.technical_weight, 0.4);
        assert_eq!(p.news_weight, 0.3);
        assert_eq!(p.social_weight, 0.2);
        assert_eq!((p.min_score, p.max_score), (15.0, 85.0));
        assert_eq!(p.neutral_score, 25.0);
    }

    #[test]
    fn test_all_zero_clamped_to_floor() {
        assert_eq!(ScoringPolicy::default().score(0.0, 0.0, 0.0), 15.0);
    }

    #[test]
    fn test_clamped_for_extreme_inputs() {
        let p = ScoringPolicy::default();
        for (t, n, s) in [
            (1e9, 1e9, 1e9),
            (-1e9, -1e9, -1e9),
            (40.0, 30.0, 20.0),
            (-5.0, 100.0, 0.0),
            (f64::MAX, 0.0, 0.0),
        ] {
            let score = p.score(t, n, s);
            assert!((15.0..=85.0).contains(&score), "{score} out of range");
        }
    }

    #[test]
    fn test_confluence_bonus_two_layers() {
        let p = ScoringPolicy::default();
        // 30*0.4 + 20*0.3 + 0 = 18, two layers positive -> +20
        let b = p.score_layers(&SubScores::all(30.0, 20.0, 0.0));
        assert_eq!(b.layers_positive, 2);
        assert!(approx(b.weighted, 18.0));
        assert!(approx(b.bonus, 20.0));
        assert!(approx(b.score, 38.0));
    }

    #[test]
    fn test_no_bonus_with_single_positive_layer() {
        let p = ScoringPolicy::default();
        // 40*0.4 = 16, no bonus -> clamped to 16
        let b = p.score_layers(&SubScores::all(40.0, 0.0, 0.0));
        assert_eq!(b.layers_positive, 1);
        assert_eq!(b.bonus, 0.0);
        assert!(approx(b.score, 16.0));
    }

    #[test]
    fn test_missing_layer_discount() {
        let p = ScoringPolicy::default();
        let subs = SubScores {
            technical: Some(40.0),
            news: Some(30.0),
            social: None,
        };
        // (16 + 9 + 20) * 2/3 = 30
        let b = p.score_layers(&subs);
        assert_eq!(b.successful_layers, 2);
        assert!(approx(b.score, 30.0));
    }

    #[test]
    fn test_all_layers_missing_is_neutral() {
        let p = ScoringPolicy::default();
        let b = p.score_layers(&SubScores::default());
        assert_eq!(b.score, 25.0);
        assert_eq!(b.successful_layers, 0);

        let nan = SubScores {
            technical: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(p.score_layers(&nan).score, 25.0);
    }

    #[test]
    fn test_max_realistic_inputs_reach_opportunity() {
        let p = ScoringPolicy::default();
        // Layer maxima: 16 + 9 + 4 + 30 = 59
        let score = p.score(40.0, 30.0, 20.0);
        assert!(approx(score, 59.0));
        assert!(p.is_opportunity(score));
        // Strong technicals alone never qualify
        assert!(!p.is_opportunity(p.score(40.0, 0.0, 0.0)));
    }

    #[test]
    fn test_social_score() {
        assert_eq!(social_score(0.5), 10.0);
        assert_eq!(social_score(3.0), 20.0);
        assert_eq!(social_score(-1.0), 0.0);
        assert_eq!(social_score(f64::NAN), 0.0);
    }
}
