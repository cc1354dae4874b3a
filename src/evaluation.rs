//! Testing and evaluation of a trained classifier: per-event scores, ROC
//! curve, area under it, signal efficiencies and separation.

use crate::cnn::CaloCnn;
use crate::data::{EventBatcher, EventClass, ImageEvent};
use crate::error::{Error, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Background efficiencies at which the signal efficiency is reported.
pub const REFERENCE_BACKGROUND_EFFICIENCIES: [f64; 3] = [0.01, 0.10, 0.30];

/// Classifier response for one event: the signal probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventScore {
    pub class: EventClass,
    pub weight: f32,
    #[serde(with = "crate::utils::float_serde")]
    pub score: f32,
}

/// Scores `events` in batches of `batch_size`.
pub fn score_events<B: Backend>(
    model: &CaloCnn<B>,
    events: &[ImageEvent],
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<EventScore>> {
    let batcher = EventBatcher::default();
    let mut scores = Vec::with_capacity(events.len());
    for chunk in events.chunks(batch_size.max(1)) {
        for event in chunk {
            model.check_input(event.image.len())?;
        }
        let batch = Batcher::<B, _, _>::batch(&batcher, chunk.to_vec(), device);
        let probs = model.forward(batch.images);
        let signal = probs.slice([0..chunk.len(), 0..1]);
        let signal: Vec<f32> = signal
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| Error::TensorData(format!("{e:?}")))?;
        scores.extend(chunk.iter().zip(signal).map(|(event, score)| EventScore {
            class: event.class,
            weight: event.weight,
            score,
        }));
    }
    Ok(scores)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Events scoring at or above this value are selected. The first point
    /// of a curve sits at +∞.
    #[serde(with = "crate::utils::float_serde")]
    pub threshold: f32,
    pub signal_efficiency: f64,
    pub background_efficiency: f64,
}

impl RocPoint {
    pub fn background_rejection(&self) -> f64 {
        1.0 - self.background_efficiency
    }
}

/// Weighted ROC curve, from (0, 0) to (1, 1) in efficiency space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
}

fn class_weights(scores: &[EventScore]) -> (f64, f64) {
    scores.iter().fold((0.0, 0.0), |(s, b), e| match e.class {
        EventClass::Signal => (s + e.weight as f64, b),
        EventClass::Background => (s, b + e.weight as f64),
    })
}

impl RocCurve {
    /// Sweeps the selection threshold from the highest score down. Events with
    /// equal scores enter together.
    pub fn from_scores(scores: &[EventScore]) -> Result<Self> {
        let (total_sig, total_bkg) = class_weights(scores);
        if total_sig <= 0.0 {
            return Err(Error::EmptyClass(EventClass::Signal.name()));
        }
        if total_bkg <= 0.0 {
            return Err(Error::EmptyClass(EventClass::Background.name()));
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut points = Vec::with_capacity(sorted.len() + 1);
        points.push(RocPoint {
            threshold: f32::INFINITY,
            signal_efficiency: 0.0,
            background_efficiency: 0.0,
        });
        let (mut sig, mut bkg) = (0.0, 0.0);
        for (i, event) in sorted.iter().enumerate() {
            match event.class {
                EventClass::Signal => sig += event.weight as f64,
                EventClass::Background => bkg += event.weight as f64,
            }
            let group_ends = sorted
                .get(i + 1)
                .is_none_or(|next| next.score != event.score);
            if group_ends {
                points.push(RocPoint {
                    threshold: event.score,
                    signal_efficiency: (sig / total_sig).clamp(0.0, 1.0),
                    background_efficiency: (bkg / total_bkg).clamp(0.0, 1.0),
                });
            }
        }
        Ok(Self { points })
    }

    /// Area under the signal-efficiency vs background-efficiency curve;
    /// equal to the area under the rejection vs signal-efficiency curve.
    pub fn auc(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| {
                let (a, b) = (w[0], w[1]);
                (b.background_efficiency - a.background_efficiency)
                    * (a.signal_efficiency + b.signal_efficiency)
                    / 2.0
            })
            .sum()
    }

    /// Signal efficiency at a background efficiency, linearly interpolated.
    pub fn signal_efficiency_at(&self, background_efficiency: f64) -> f64 {
        let target = background_efficiency.clamp(0.0, 1.0);
        for w in self.points.windows(2) {
            let (a, b) = (w[0], w[1]);
            if a.background_efficiency <= target && target < b.background_efficiency {
                let t = (target - a.background_efficiency)
                    / (b.background_efficiency - a.background_efficiency);
                return a.signal_efficiency + t * (b.signal_efficiency - a.signal_efficiency);
            }
        }
        self.points
            .iter()
            .filter(|p| p.background_efficiency <= target)
            .map(|p| p.signal_efficiency)
            .fold(0.0, f64::max)
    }

    /// SVG plot of background rejection against signal efficiency, one
    /// polyline per curve.
    pub fn render_svg(curves: &[(&str, &RocCurve)], title: &str) -> String {
        const SIZE: f64 = 600.0;
        const MARGIN: f64 = 70.0;
        const COLORS: [&str; 4] = ["#1f77b4", "#d62728", "#2ca02c", "#9467bd"];
        let span = SIZE - 2.0 * MARGIN;
        let x = |v: f64| MARGIN + v * span;
        let y = |v: f64| SIZE - MARGIN - v * span;

        let mut svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{SIZE}\" height=\"{SIZE}\" \
             font-family=\"sans-serif\" font-size=\"14\">\n\
             <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n\
             <text x=\"{}\" y=\"30\" text-anchor=\"middle\" font-size=\"18\">{}</text>\n\
             <rect x=\"{MARGIN}\" y=\"{MARGIN}\" width=\"{span}\" height=\"{span}\" \
             fill=\"none\" stroke=\"black\"/>\n",
            SIZE / 2.0,
            escape(title),
        );
        for i in 0..=10 {
            let v = i as f64 / 10.0;
            svg.push_str(&format!(
                "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\">{v:.1}</text>\n\
                 <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{v:.1}</text>\n",
                x(v),
                SIZE - MARGIN + 20.0,
                MARGIN - 8.0,
                y(v) + 5.0,
            ));
        }
        svg.push_str(&format!(
            "<text x=\"{}\" y=\"{}\" text-anchor=\"middle\">Signal efficiency</text>\n\
             <text x=\"20\" y=\"{}\" text-anchor=\"middle\" \
             transform=\"rotate(-90 20 {})\">Background rejection</text>\n",
            SIZE / 2.0,
            SIZE - 20.0,
            SIZE / 2.0,
            SIZE / 2.0,
        ));

        for (i, (name, curve)) in curves.iter().enumerate() {
            let color = COLORS[i % COLORS.len()];
            let points: Vec<String> = curve
                .points
                .iter()
                .map(|p| {
                    format!(
                        "{:.2},{:.2}",
                        x(p.signal_efficiency),
                        y(p.background_rejection())
                    )
                })
                .collect();
            svg.push_str(&format!(
                "<polyline fill=\"none\" stroke=\"{color}\" stroke-width=\"2\" points=\"{}\"/>\n\
                 <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{color}\">{} (AUC {:.3})</text>\n",
                points.join(" "),
                MARGIN + 10.0,
                SIZE - MARGIN - 15.0 - 20.0 * i as f64,
                escape(name),
                curve.auc(),
            ));
        }
        svg.push_str("</svg>\n");
        svg
    }
}

pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Separation `<S²>` of the signal and background score distributions,
/// 0 for identical and 1 for disjoint shapes.
pub fn separation(scores: &[EventScore], n_bins: usize) -> f64 {
    let n_bins = n_bins.max(1);
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), e| {
            (lo.min(e.score), hi.max(e.score))
        });
    if !(max > min) {
        return 0.0;
    }
    let mut sig = vec![0.0; n_bins];
    let mut bkg = vec![0.0; n_bins];
    for e in scores {
        let bin = (((e.score - min) / (max - min)) * n_bins as f32) as usize;
        let bin = bin.min(n_bins - 1);
        match e.class {
            EventClass::Signal => sig[bin] += e.weight as f64,
            EventClass::Background => bkg[bin] += e.weight as f64,
        }
    }
    let (sum_sig, sum_bkg): (f64, f64) = (sig.iter().sum(), bkg.iter().sum());
    if sum_sig <= 0.0 || sum_bkg <= 0.0 {
        return 0.0;
    }
    0.5 * sig
        .iter()
        .zip(&bkg)
        .map(|(s, b)| (s / sum_sig, b / sum_bkg))
        .filter(|(s, b)| s + b > 0.0)
        .map(|(s, b)| (s - b).powi(2) / (s + b))
        .sum::<f64>()
}

/// Signal efficiency at one reference background efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyPoint {
    pub background_efficiency: f64,
    pub signal_efficiency: f64,
}

/// Evaluation figures of one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEvaluation {
    #[serde(with = "crate::utils::float_serde")]
    pub roc_auc: f64,
    /// AUC on the training events, for an overtraining check.
    #[serde(with = "crate::utils::float_serde")]
    pub roc_auc_train: f64,
    #[serde(with = "crate::utils::float_serde")]
    pub separation: f64,
    pub efficiencies: Vec<EfficiencyPoint>,
    pub efficiencies_train: Vec<EfficiencyPoint>,
    pub roc: RocCurve,
}

fn efficiencies(curve: &RocCurve) -> Vec<EfficiencyPoint> {
    REFERENCE_BACKGROUND_EFFICIENCIES
        .iter()
        .map(|&background_efficiency| EfficiencyPoint {
            background_efficiency,
            signal_efficiency: curve.signal_efficiency_at(background_efficiency),
        })
        .collect()
}

impl MethodEvaluation {
    pub fn new(test: &[EventScore], train: &[EventScore]) -> Result<Self> {
        let roc = RocCurve::from_scores(test)?;
        let roc_train = RocCurve::from_scores(train)?;
        Ok(Self {
            roc_auc: roc.auc(),
            roc_auc_train: roc_train.auc(),
            separation: separation(test, 40),
            efficiencies: efficiencies(&roc),
            efficiencies_train: efficiencies(&roc_train),
            roc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnn::{CaloCnnConfig, ConvStageConfig};
    use burn::backend::NdArray;

    fn score(class: EventClass, score: f32) -> EventScore {
        EventScore {
            class,
            weight: 1.0,
            score,
        }
    }

    fn separated() -> Vec<EventScore> {
        vec![
            score(EventClass::Signal, 0.9),
            score(EventClass::Signal, 0.8),
            score(EventClass::Background, 0.2),
            score(EventClass::Background, 0.1),
        ]
    }

    #[test]
    fn perfect_separation() {
        let roc = RocCurve::from_scores(&separated()).unwrap();
        assert!((roc.auc() - 1.0).abs() < 1e-12);
        assert!((roc.signal_efficiency_at(0.01) - 1.0).abs() < 1e-12);
        assert!((separation(&separated(), 40) - 1.0).abs() < 1e-12);

        let first = roc.points.first().unwrap();
        let last = roc.points.last().unwrap();
        assert_eq!((0.0, 0.0), (first.signal_efficiency, first.background_efficiency));
        assert_eq!((1.0, 1.0), (last.signal_efficiency, last.background_efficiency));
    }

    #[test]
    fn inverted_scores() {
        let inverted: Vec<_> = separated()
            .into_iter()
            .map(|e| EventScore {
                score: 1.0 - e.score,
                ..e
            })
            .collect();
        let roc = RocCurve::from_scores(&inverted).unwrap();
        assert!(roc.auc().abs() < 1e-12);
        assert!(roc.signal_efficiency_at(0.3).abs() < 1e-12);
    }

    #[test]
    fn constant_scores_are_random_guessing() {
        let scores = vec![
            score(EventClass::Signal, 0.5),
            score(EventClass::Background, 0.5),
            score(EventClass::Signal, 0.5),
        ];
        let roc = RocCurve::from_scores(&scores).unwrap();
        assert_eq!(2, roc.points.len());
        assert!((roc.auc() - 0.5).abs() < 1e-12);
        assert!((roc.signal_efficiency_at(0.3) - 0.3).abs() < 1e-12);
        assert_eq!(0.0, separation(&scores, 40));
    }

    #[test]
    fn weights_move_the_curve() {
        let mut scores = vec![
            score(EventClass::Signal, 0.9),
            score(EventClass::Background, 0.7),
            score(EventClass::Signal, 0.6),
            score(EventClass::Background, 0.1),
        ];
        let unweighted = RocCurve::from_scores(&scores).unwrap().auc();
        assert!((unweighted - 0.75).abs() < 1e-12);

        scores[2].weight = 3.0;
        // the misordered signal now carries 3/4 of the signal weight
        let weighted = RocCurve::from_scores(&scores).unwrap().auc();
        assert!((weighted - 0.625).abs() < 1e-12);
    }

    #[test]
    fn missing_class_is_an_error() {
        let scores = vec![score(EventClass::Signal, 0.4)];
        assert!(matches!(
            RocCurve::from_scores(&scores),
            Err(Error::EmptyClass("background"))
        ));
    }

    #[test]
    fn svg_contains_every_curve() {
        let roc = RocCurve::from_scores(&separated()).unwrap();
        let svg = RocCurve::render_svg(&[("CNN", &roc), ("a<b", &roc)], "ROC");
        assert!(svg.starts_with("<svg"));
        assert_eq!(2, svg.matches("<polyline").count());
        assert!(svg.contains("a&lt;b"));
    }

    #[test]
    fn evaluation_reads_back_from_json() {
        let eval = MethodEvaluation::new(&separated(), &separated()).unwrap();
        assert_eq!(f32::INFINITY, eval.roc.points[0].threshold);
        let json = serde_json::to_string(&eval).unwrap();
        let back: MethodEvaluation = serde_json::from_str(&json).unwrap();
        assert_eq!(eval, back);

        let diverged = score(EventClass::Signal, f32::NAN);
        let json = serde_json::to_string(&diverged).unwrap();
        let back: EventScore = serde_json::from_str(&json).unwrap();
        assert!(back.score.is_nan());
    }

    #[test]
    fn scores_are_signal_probabilities() {
        type B = NdArray<f32>;
        let device = Default::default();
        let model = CaloCnnConfig::new(vec![ConvStageConfig::new(2)])
            .with_height(4)
            .with_width(4)
            .init::<B>(&device);
        let events: Vec<_> = (0..5)
            .map(|i| ImageEvent {
                image: vec![i as f32; 16],
                class: if i < 3 {
                    EventClass::Signal
                } else {
                    EventClass::Background
                },
                weight: 1.0,
            })
            .collect();
        let scores = score_events(&model, &events, 2, &device).unwrap();
        assert_eq!(5, scores.len());
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(&s.score)));
        assert_eq!(EventClass::Background, scores[4].class);

        let short = vec![ImageEvent {
            image: vec![0.0; 15],
            class: EventClass::Signal,
            weight: 1.0,
        }];
        assert!(score_events(&model, &short, 2, &device).is_err());
    }
}
