use crate::error::{ClientError, Result};
use pbsq_core::constants::suffixes;
use pbsq_core::model::JobIdentity;
use std::io::Write;
use std::path::PathBuf;

/// `<name>.job_id` records in a spool directory.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    dir: PathBuf,
}

impl JobRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, suffixes::JOB_ID))
    }

    /// Replaces any earlier record atomically.
    pub fn record(&self, name: &str, identity: &JobIdentity) -> Result<PathBuf> {
        fs_err::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(identity.to_record().as_bytes())?;
        tmp.persist(&path).map_err(|e| ClientError::Registry {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Option<JobIdentity>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs_err::read_to_string(&path)?;
        let identity = JobIdentity::parse_record(&content);
        if identity.is_none() {
            tracing::warn!("Job id record {} carries no job_id", path.display());
        }
        Ok(identity)
    }
}
