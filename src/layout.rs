//! On-disk layout of a search run.
//!
//! ```text
//! <run>/data/linker<ID>.{coeff,lmpdat}
//! <run>/data/linker<ID>_deformation/linker<ID>-ave-force.d   (simulation output)
//! <run>/data/possible/...                                    (speculative inputs)
//! <run>/feature/<feature>/[possible/]<ID>.npy
//! <run>/property/<property>/
//! <run>/<mode>.txt                                           (result log)
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
    feature: String,
    property: String,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>, feature: &str, property: &str) -> Self {
        Self {
            root: root.into(),
            feature: feature.to_string(),
            property: property.to_string(),
        }
    }

    /// Create an empty directory tree. Data, feature and property outputs of a
    /// previous run in the same directory are removed, otherwise old completion
    /// markers would read as fresh results. Result logs of other modes stay.
    pub fn prepare(&self) -> io::Result<()> {
        for dir in [self.data_dir(false), self.feature_dir(false), self.property_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        fs::create_dir_all(self.data_dir(true))?;
        fs::create_dir_all(self.feature_dir(true))?;
        fs::create_dir_all(self.property_dir())?;
        Ok(())
    }

    pub fn data_dir(&self, speculative: bool) -> PathBuf {
        let dir = self.root.join("data");
        if speculative { dir.join("possible") } else { dir }
    }

    pub fn feature_dir(&self, speculative: bool) -> PathBuf {
        self.feature_dir_for(&self.feature, speculative)
    }

    pub fn feature_dir_for(&self, feature: &str, speculative: bool) -> PathBuf {
        let dir = self.root.join("feature").join(feature);
        if speculative { dir.join("possible") } else { dir }
    }

    pub fn property_dir(&self) -> PathBuf {
        self.root.join("property").join(&self.property)
    }

    pub fn coeff_path(&self, linker_id: &str, speculative: bool) -> PathBuf {
        self.data_dir(speculative)
            .join(format!("linker{linker_id}.coeff"))
    }

    pub fn lmpdat_path(&self, linker_id: &str, speculative: bool) -> PathBuf {
        self.data_dir(speculative)
            .join(format!("linker{linker_id}.lmpdat"))
    }

    pub fn feature_path_for(&self, feature: &str, linker_id: &str, speculative: bool) -> PathBuf {
        self.feature_dir_for(feature, speculative)
            .join(format!("{linker_id}.npy"))
    }

    /// Working directory of the deformation simulation; its presence means
    /// the facility has started the job.
    pub fn simulation_dir(&self, linker_id: &str) -> PathBuf {
        self.data_dir(false)
            .join(format!("linker{linker_id}_deformation"))
    }

    /// Written by the simulation when it completes.
    pub fn completion_marker(&self, linker_id: &str) -> PathBuf {
        self.simulation_dir(linker_id)
            .join(format!("linker{linker_id}-ave-force.d"))
    }

    pub fn result_log(&self, mode: &str) -> PathBuf {
        self.root.join(format!("{mode}.txt"))
    }
}
