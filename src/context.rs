//! Per-call generation state: the random source and where files go.

use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// File locations used by one generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    dir: PathBuf,
    model: String,
    abstract_trajectories: String,
    concrete_trajectories: String,
}

impl OutputPaths {
    /// Default file names inside `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        OutputPaths {
            dir: dir.into(),
            model: "sta.prism".to_string(),
            abstract_trajectories: "abstract_trajectories.json".to_string(),
            concrete_trajectories: "concrete_trajectories.json".to_string(),
        }
    }

    pub fn with_model(mut self, name: impl Into<String>) -> Self {
        self.model = name.into();
        self
    }

    pub fn with_abstract_trajectories(mut self, name: impl Into<String>) -> Self {
        self.abstract_trajectories = name.into();
        self
    }

    pub fn with_concrete_trajectories(mut self, name: impl Into<String>) -> Self {
        self.concrete_trajectories = name.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encoded model handed to the word generator.
    pub fn model(&self) -> PathBuf {
        self.dir.join(&self.model)
    }

    /// Guard-visible companion of [`OutputPaths::model`].
    pub fn model_constraints(&self) -> PathBuf {
        self.dir.join(format!("{}.constraints", self.model))
    }

    pub fn abstract_trajectories(&self) -> PathBuf {
        self.dir.join(&self.abstract_trajectories)
    }

    pub fn concrete_trajectories(&self) -> PathBuf {
        self.dir.join(&self.concrete_trajectories)
    }
}

/// Random source and output locations threaded through every generation call.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub rng: ChaCha8Rng,
    pub paths: OutputPaths,
}

impl GenerationContext {
    /// Reproducible context: equal seeds give equal trajectories.
    pub fn seeded(seed: u64, paths: OutputPaths) -> Self {
        GenerationContext {
            rng: ChaCha8Rng::seed_from_u64(seed),
            paths,
        }
    }

    /// Context seeded from OS entropy. Output is **not** reproducible.
    pub fn from_entropy(paths: OutputPaths) -> Self {
        GenerationContext {
            rng: ChaCha8Rng::from_entropy(),
            paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::Rng;
    use test_log::test;

    #[test]
    fn test_paths() {
        let paths = OutputPaths::new("out").with_model("meals.prism");
        assert_eq!(paths.model(), Path::new("out/meals.prism"));
        assert_eq!(paths.model_constraints(), Path::new("out/meals.prism.constraints"));
        assert_eq!(paths.abstract_trajectories(), Path::new("out/abstract_trajectories.json"));
        assert_eq!(paths.concrete_trajectories(), Path::new("out/concrete_trajectories.json"));
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = GenerationContext::seeded(42, OutputPaths::new("."));
        let mut b = GenerationContext::seeded(42, OutputPaths::new("."));
        let xs: Vec<u64> = (0..8).map(|_| a.rng.gen()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.rng.gen()).collect();
        assert_eq!(xs, ys);
    }
}
