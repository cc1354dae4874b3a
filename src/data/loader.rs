use crate::data::{EventClass, ImageEvent, ImageTree};
use crate::error::{self, Error};
use burn::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// How events of a class are assigned to the training and testing sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    /// Seeded random sampling without replacement.
    Random,
    /// Leading rows train, the following rows test.
    Block,
}

/// Renormalization of event weights after the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormMode {
    /// Keep the per-tree weights.
    None,
    /// Per class, scale weights so the training weights sum to the number of
    /// training events.
    NumEvents,
    /// Like `NumEvents` for signal; background is scaled so its training
    /// weights sum to the number of signal training events.
    EqualNumEvents,
}

#[derive(Config, Debug)]
pub struct SplitConfig {
    #[config(default = "None")]
    pub n_train_signal: Option<usize>,
    #[config(default = "None")]
    pub n_test_signal: Option<usize>,
    #[config(default = "None")]
    pub n_train_background: Option<usize>,
    #[config(default = "None")]
    pub n_test_background: Option<usize>,
    /// Training share for classes without explicit counts.
    #[config(default = 0.8)]
    pub train_fraction: f64,
    #[config(default = "SplitMode::Random")]
    pub split_mode: SplitMode,
    #[config(default = "NormMode::NumEvents")]
    pub norm_mode: NormMode,
    #[config(default = 100)]
    pub seed: u64,
}

impl SplitConfig {
    fn counts(&self, class: EventClass) -> (Option<usize>, Option<usize>) {
        match class {
            EventClass::Signal => (self.n_train_signal, self.n_test_signal),
            EventClass::Background => (self.n_train_background, self.n_test_background),
        }
    }
}

/// Number of training and testing events taken from one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub n_train: usize,
    pub n_test: usize,
}

impl SplitPlan {
    /// Resolves the requested counts against `n_events` available events.
    ///
    /// Missing counts take the rest of the events; when both are missing the
    /// training set gets `train_fraction` of them.
    pub fn for_class(
        n_events: usize,
        n_train: Option<usize>,
        n_test: Option<usize>,
        train_fraction: f64,
    ) -> error::Result<Self> {
        if !(0.0..=1.0).contains(&train_fraction) {
            return Err(Error::InvalidSplit(format!(
                "train fraction {train_fraction} is outside [0, 1]"
            )));
        }
        let (n_train, n_test) = match (n_train, n_test) {
            (Some(train), Some(test)) => (train, test),
            (Some(train), None) => (train, n_events.saturating_sub(train)),
            (None, Some(test)) => (n_events.saturating_sub(test), test),
            (None, None) => {
                let train = ((n_events as f64 * train_fraction).round() as usize).min(n_events);
                (train, n_events - train)
            }
        };
        if n_train + n_test > n_events {
            return Err(Error::InvalidSplit(format!(
                "{n_train} training + {n_test} testing events requested, only {n_events} available"
            )));
        }
        if n_train == 0 || n_test == 0 {
            return Err(Error::InvalidSplit(format!(
                "{n_events} events give {n_train} training and {n_test} testing events"
            )));
        }
        Ok(Self { n_train, n_test })
    }

    /// Picks the row indices of the training and testing sets.
    pub fn select(
        &self,
        n_events: usize,
        mode: SplitMode,
        rng: &mut StdRng,
    ) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..n_events).collect();
        if mode == SplitMode::Random {
            indices.shuffle(rng);
        }
        let test = indices[self.n_train..self.n_train + self.n_test].to_vec();
        indices.truncate(self.n_train);
        (indices, test)
    }
}

/// Split sizes per class, as reported in the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub signal: SplitPlan,
    pub background: SplitPlan,
}

impl SplitSummary {
    pub fn plan(&self, class: EventClass) -> SplitPlan {
        match class {
            EventClass::Signal => self.signal,
            EventClass::Background => self.background,
        }
    }
}

/// Training and testing events of both classes.
#[derive(Debug, Clone)]
pub struct EventDataSet {
    pub train: Vec<ImageEvent>,
    pub test: Vec<ImageEvent>,
    pub summary: SplitSummary,
    /// Per-event input length.
    pub n_variables: usize,
}

#[derive(Debug, Clone)]
struct ClassTree {
    class: EventClass,
    tree: ImageTree,
    weight: f32,
}

#[derive(Debug, Clone)]
struct VariablesArray {
    name: String,
    len: usize,
}

/// Collects the signal and background trees, the input variables, and
/// prepares the training/testing split.
#[derive(Debug, Clone)]
pub struct EventLoader {
    pub name: String,
    trees: Vec<ClassTree>,
    variables: Option<VariablesArray>,
}

impl EventLoader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trees: Vec::new(),
            variables: None,
        }
    }

    /// Adds a signal tree whose events all carry `weight`.
    pub fn add_signal_tree(&mut self, tree: ImageTree, weight: f32) {
        self.add_tree(EventClass::Signal, tree, weight)
    }

    /// Adds a background tree whose events all carry `weight`.
    pub fn add_background_tree(&mut self, tree: ImageTree, weight: f32) {
        self.add_tree(EventClass::Background, tree, weight)
    }

    pub fn add_tree(&mut self, class: EventClass, tree: ImageTree, weight: f32) {
        log::info!(
            "[{}] Add tree {} of type {} with weight {weight}",
            self.name,
            tree.name(),
            class.name()
        );
        self.trees.push(ClassTree {
            class,
            tree,
            weight,
        });
    }

    /// Registers the array branch `name` with `len` components per event as
    /// the classifier input.
    pub fn add_variables_array(&mut self, name: impl Into<String>, len: usize) {
        let name = name.into();
        log::info!("[{}] Add variables array '{name}' of size {len}", self.name);
        self.variables = Some(VariablesArray { name, len });
    }

    pub fn n_variables(&self) -> Option<usize> {
        self.variables.as_ref().map(|v| v.len)
    }

    /// Reads every tree and splits each class into training and testing
    /// events, independently of the other class.
    pub fn prepare_training_and_test_tree(&self, config: &SplitConfig) -> error::Result<EventDataSet> {
        let variables = self.variables.as_ref().ok_or_else(|| {
            Error::InvalidSplit("no input variables have been registered".to_string())
        })?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut train = Vec::new();
        let mut test = Vec::new();
        let mut plans = Vec::with_capacity(2);

        for class in EventClass::ALL {
            let events = self.read_class(class, variables)?;
            if events.is_empty() {
                return Err(Error::EmptyClass(class.name()));
            }
            let (n_train, n_test) = config.counts(class);
            let plan = SplitPlan::for_class(events.len(), n_train, n_test, config.train_fraction)?;
            let (train_idx, test_idx) = plan.select(events.len(), config.split_mode, &mut rng);
            log::info!(
                "[{}] {}: {} events, {} training, {} testing",
                self.name,
                class.name(),
                events.len(),
                plan.n_train,
                plan.n_test
            );
            train.extend(train_idx.into_iter().map(|i| events[i].clone()));
            test.extend(test_idx.into_iter().map(|i| events[i].clone()));
            plans.push(plan);
        }

        renormalize(&mut train, &mut test, config.norm_mode);

        Ok(EventDataSet {
            train,
            test,
            summary: SplitSummary {
                signal: plans[0],
                background: plans[1],
            },
            n_variables: variables.len,
        })
    }

    fn read_class(&self, class: EventClass, variables: &VariablesArray) -> error::Result<Vec<ImageEvent>> {
        let mut events = Vec::new();
        for entry in self.trees.iter().filter(|t| t.class == class) {
            for image in entry.tree.read(&variables.name)? {
                if image.len() != variables.len {
                    return Err(Error::InputLength {
                        expected: variables.len,
                        got: image.len(),
                    });
                }
                events.push(ImageEvent {
                    image,
                    class,
                    weight: entry.weight,
                });
            }
        }
        Ok(events)
    }
}

fn class_weight_sum(events: &[ImageEvent], class: EventClass) -> (usize, f64) {
    events
        .iter()
        .filter(|e| e.class == class)
        .fold((0, 0.0), |(n, w), e| (n + 1, w + e.weight as f64))
}

/// Applies `mode`, computing the factors from the training events and
/// scaling training and testing events alike.
pub fn renormalize(train: &mut [ImageEvent], test: &mut [ImageEvent], mode: NormMode) {
    let (n_sig, w_sig) = class_weight_sum(train, EventClass::Signal);
    let (n_bkg, w_bkg) = class_weight_sum(train, EventClass::Background);
    let factor = |target: usize, sum: f64| {
        if sum > 0.0 { target as f64 / sum } else { 1.0 }
    };
    let (f_sig, f_bkg) = match mode {
        NormMode::None => return,
        NormMode::NumEvents => (factor(n_sig, w_sig), factor(n_bkg, w_bkg)),
        NormMode::EqualNumEvents => (factor(n_sig, w_sig), factor(n_sig, w_bkg)),
    };
    log::debug!("Renormalizing weights: signal x{f_sig:.4}, background x{f_bkg:.4}");
    for event in train.iter_mut().chain(test.iter_mut()) {
        let f = match event.class {
            EventClass::Signal => f_sig,
            EventClass::Background => f_bkg,
        };
        event.weight = (event.weight as f64 * f) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize, len: usize, value: f32) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![value + i as f32; len]).collect()
    }

    fn loader(n_sig: usize, n_bkg: usize) -> EventLoader {
        let mut loader = EventLoader::new("dataset");
        loader.add_signal_tree(ImageTree::in_memory("sig", rows(n_sig, 4, 0.0)), 1.0);
        loader.add_background_tree(ImageTree::in_memory("bkg", rows(n_bkg, 4, 0.5)), 1.0);
        loader.add_variables_array("vars", 4);
        loader
    }

    #[test]
    fn ten_thousand_rows_split_eighty_twenty() {
        let data = loader(10_000, 10_000)
            .prepare_training_and_test_tree(&SplitConfig::new())
            .unwrap();
        for class in EventClass::ALL {
            assert_eq!(
                SplitPlan {
                    n_train: 8000,
                    n_test: 2000
                },
                data.summary.plan(class)
            );
            let n_train = data.train.iter().filter(|e| e.class == class).count();
            let n_test = data.test.iter().filter(|e| e.class == class).count();
            assert_eq!((8000, 2000), (n_train, n_test));
        }
    }

    #[test]
    fn classes_split_independently() {
        let data = loader(100, 50)
            .prepare_training_and_test_tree(&SplitConfig::new())
            .unwrap();
        assert_eq!(SplitPlan { n_train: 80, n_test: 20 }, data.summary.signal);
        assert_eq!(SplitPlan { n_train: 40, n_test: 10 }, data.summary.background);
    }

    #[test]
    fn random_split_is_seeded_and_disjoint() {
        let loader = loader(200, 200);
        let a = loader
            .prepare_training_and_test_tree(&SplitConfig::new())
            .unwrap();
        let b = loader
            .prepare_training_and_test_tree(&SplitConfig::new())
            .unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);

        // signal rows are unique, so no image may appear in both sets
        for event in a.test.iter().filter(|e| e.class == EventClass::Signal) {
            assert!(!a.train.contains(event));
        }
    }

    #[test]
    fn explicit_counts_win_over_the_fraction() {
        let config = SplitConfig::new()
            .with_n_train_signal(Some(30))
            .with_n_test_background(Some(5))
            .with_split_mode(SplitMode::Block);
        let data = loader(50, 50).prepare_training_and_test_tree(&config).unwrap();
        assert_eq!(SplitPlan { n_train: 30, n_test: 20 }, data.summary.signal);
        assert_eq!(SplitPlan { n_train: 45, n_test: 5 }, data.summary.background);
        // block mode keeps the row order
        assert_eq!(vec![0.0; 4], data.train[0].image);
    }

    #[test]
    fn impossible_counts_are_rejected() {
        assert!(SplitPlan::for_class(10, Some(8), Some(8), 0.8).is_err());
        assert!(SplitPlan::for_class(10, None, None, 1.0).is_err());
        assert!(SplitPlan::for_class(10, None, None, 1.5).is_err());
    }

    #[test]
    fn wrong_image_length_is_rejected() {
        let mut loader = loader(10, 10);
        loader.add_variables_array("vars", 16384);
        match loader.prepare_training_and_test_tree(&SplitConfig::new()) {
            Err(Error::InputLength { expected, got }) => assert_eq!((16384, 4), (expected, got)),
            other => panic!("expected InputLength, got {other:?}"),
        }
    }

    #[test]
    fn empty_class_is_rejected() {
        let mut loader = EventLoader::new("dataset");
        loader.add_signal_tree(ImageTree::in_memory("sig", rows(10, 4, 0.0)), 1.0);
        loader.add_variables_array("vars", 4);
        assert!(matches!(
            loader.prepare_training_and_test_tree(&SplitConfig::new()),
            Err(Error::EmptyClass("background"))
        ));
    }

    #[test]
    fn num_events_normalization() {
        let mut loader = EventLoader::new("dataset");
        loader.add_signal_tree(ImageTree::in_memory("sig", rows(10, 1, 0.0)), 2.0);
        loader.add_background_tree(ImageTree::in_memory("bkg", rows(20, 1, 0.0)), 0.5);
        loader.add_variables_array("vars", 1);

        let data = loader
            .prepare_training_and_test_tree(&SplitConfig::new())
            .unwrap();
        for class in EventClass::ALL {
            let (n, w) = class_weight_sum(&data.train, class);
            assert!((n as f64 - w).abs() < 1e-4);
        }

        let data = loader
            .prepare_training_and_test_tree(
                &SplitConfig::new().with_norm_mode(NormMode::EqualNumEvents),
            )
            .unwrap();
        let (n_sig, _) = class_weight_sum(&data.train, EventClass::Signal);
        let (_, w_bkg) = class_weight_sum(&data.train, EventClass::Background);
        assert!((n_sig as f64 - w_bkg).abs() < 1e-4);

        let data = loader
            .prepare_training_and_test_tree(&SplitConfig::new().with_norm_mode(NormMode::None))
            .unwrap();
        assert!(data.test.iter().all(|e| match e.class {
            EventClass::Signal => e.weight == 2.0,
            EventClass::Background => e.weight == 0.5,
        }));
    }
}
