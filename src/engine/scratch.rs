use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use super::Engine;

/// Job-local namespace inside the engine's shared filesystem.
///
/// Every file a job creates carries the job prefix; dropping the scratch deletes all
/// of them, so success, retry and error paths clean up alike.
pub struct JobScratch {
    engine: Arc<dyn Engine>,
    prefix: String,
    live: Arc<()>,
}

/// Weak view of a scratch namespace, held by queued engine commands
#[derive(Debug, Clone)]
pub struct ScratchLease {
    live: Weak<()>,
    prefix: String,
}

impl ScratchLease {
    /// True once the owning job dropped its scratch
    pub fn is_released(&self) -> bool {
        self.live.strong_count() == 0
    }

    /// Delete files a late command wrote under the released prefix
    pub fn sweep(&self, engine: &dyn Engine) -> usize {
        let files = match engine.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list engine files: {}", e);
                return 0;
            }
        };
        let mut swept = 0;
        for name in files.iter().filter(|f| f.starts_with(self.prefix.as_str())) {
            if engine.remove_file(name).is_ok() {
                swept += 1;
            }
        }
        if swept > 0 {
            debug!("Swept {} late file(s) for {}", swept, self.prefix);
        }
        swept
    }
}

impl JobScratch {
    pub fn new(engine: Arc<dyn Engine>, job_id: &str) -> Self {
        let sanitized: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .take(48)
            .collect();
        Self {
            engine,
            // random token: no job prefix is a prefix of another job's
            prefix: format!("job_{}_{}_", sanitized, &Uuid::new_v4().simple().to_string()[..8]),
            live: Arc::new(()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn lease(&self) -> ScratchLease {
        ScratchLease {
            live: Arc::downgrade(&self.live),
            prefix: self.prefix.clone(),
        }
    }

    /// Job-unique engine file name for `name`
    pub fn name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Strip the job prefix from an engine file name
    pub fn local_name<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.strip_prefix(self.prefix.as_str())
    }

    pub fn write(&self, name: &str, data: &[u8]) -> Result<String> {
        let full = self.name(name);
        self.engine.write_file(&full, data)?;
        Ok(full)
    }

    pub fn read(&self, full: &str) -> Result<Vec<u8>> {
        self.engine.read_file(full)
    }

    /// Read a file, treating missing or empty output as absent
    pub fn read_nonempty(&self, full: &str) -> Option<Vec<u8>> {
        self.engine.read_file(full).ok().filter(|data| !data.is_empty())
    }

    /// Best-effort delete
    pub fn remove(&self, full: &str) {
        if let Err(e) = self.engine.remove_file(full) {
            debug!("Scratch remove {} skipped: {}", full, e);
        }
    }

    /// Files owned by this job, as local (unprefixed) names
    pub fn list(&self) -> Vec<String> {
        match self.engine.list_files() {
            Ok(files) => files
                .iter()
                .filter_map(|f| self.local_name(f).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!("Failed to list engine files: {}", e);
                Vec::new()
            }
        }
    }

    pub fn cleanup(&self) -> usize {
        let owned = self.list();
        for name in &owned {
            self.remove(&self.name(name));
        }
        if !owned.is_empty() {
            debug!("Cleaned {} scratch file(s) for {}", owned.len(), self.prefix);
        }
        owned.len()
    }
}

impl Drop for JobScratch {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    #[test]
    fn test_names_are_job_scoped() {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new(|_, _| Ok(())));
        let scratch = JobScratch::new(engine, "job/1 ../x");
        let full = scratch.name("input.bin");
        assert!(full.starts_with("job_job_1____x_"));
        assert!(!full.contains('/'));
        assert_eq!(scratch.local_name(&full), Some("input.bin"));
        assert_eq!(scratch.local_name("job_other_input.bin"), None);
    }

    #[test]
    fn test_drop_removes_only_own_files() {
        let memory = Arc::new(MemoryEngine::new(|_, _| Ok(())));
        let engine: Arc<dyn Engine> = memory.clone();
        engine.write_file("job_other_input.bin", b"keep").unwrap();
        let sibling = JobScratch::new(engine.clone(), "a_b");
        sibling.write("input.bin", b"keep too").unwrap();
        {
            let scratch = JobScratch::new(engine.clone(), "a");
            scratch.write("input.bin", b"x").unwrap();
            engine.write_file(&scratch.name("extracted_sub_01.srt"), b"y").unwrap();
            assert_eq!(scratch.list(), vec!["extracted_sub_01.srt", "input.bin"]);
        }
        let left = memory.file_names();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&"job_other_input.bin".to_string()));
        assert!(left.contains(&sibling.name("input.bin")));
    }

    #[test]
    fn test_lease_outlives_scratch() {
        let memory = Arc::new(MemoryEngine::new(|_, _| Ok(())));
        let engine: Arc<dyn Engine> = memory.clone();
        let scratch = JobScratch::new(engine.clone(), "late");
        let lease = scratch.lease();
        assert!(!lease.is_released());

        let late = scratch.name("extracted_sub_01.srt");
        drop(scratch);
        assert!(lease.is_released());

        engine.write_file(&late, b"written after cleanup").unwrap();
        engine.write_file("job_other_input.bin", b"keep").unwrap();
        assert_eq!(lease.sweep(engine.as_ref()), 1);
        assert_eq!(memory.file_names(), vec!["job_other_input.bin".to_string()]);
    }
}
