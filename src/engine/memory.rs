//! In-memory engine used by tests to script command outcomes.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Result, XsyncError};
use super::Engine;

pub type Files = BTreeMap<String, Vec<u8>>;
type Handler = Box<dyn Fn(&[String], &mut Files) -> Result<()> + Send + Sync>;
type Hook = Box<dyn Fn() + Send + Sync>;
type DelayWhen = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

pub struct MemoryEngine {
    files: Mutex<Files>,
    handler: Handler,
    delay: Option<Duration>,
    delay_when: DelayWhen,
    on_start: Hook,
    on_end: Hook,
    history: Mutex<Vec<Vec<String>>>,
}

impl MemoryEngine {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[String], &mut Files) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            files: Mutex::new(Files::new()),
            handler: Box::new(handler),
            delay: None,
            delay_when: Box::new(|_| true),
            on_start: Box::new(|| {}),
            on_end: Box::new(|| {}),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds after `delay`, calling the hooks around the wait
    pub fn with_async_delay<S, E>(delay: Duration, on_start: S, on_end: E) -> Self
    where
        S: Fn() + Send + Sync + 'static,
        E: Fn() + Send + Sync + 'static,
    {
        let mut engine = Self::new(|_, _| Ok(()));
        engine.delay = Some(delay);
        engine.on_start = Box::new(on_start);
        engine.on_end = Box::new(on_end);
        engine
    }

    /// Delay only the commands `when` selects, keeping the scripted handler
    pub fn with_delay_when<W>(mut self, delay: Duration, when: W) -> Self
    where
        W: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.delay = Some(delay);
        self.delay_when = Box::new(when);
        self
    }

    pub fn history(&self) -> Vec<Vec<String>> {
        self.history.lock().unwrap().clone()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

/// Value following `flag` in an argument list
pub fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Expand a `%02d` output pattern for a 1-based index
pub fn expand_pattern(pattern: &str, index: usize) -> String {
    pattern.replace("%02d", &format!("{:02}", index))
}

#[async_trait]
impl Engine for MemoryEngine {
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        self.files.lock().unwrap().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| XsyncError::Engine(format!("No such file: {}", name)))
    }

    fn remove_file(&self, name: &str) -> Result<()> {
        self.files.lock().unwrap().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.file_names())
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        (self.on_start)();
        if let Some(delay) = self.delay.filter(|_| (self.delay_when)(&args)) {
            tokio::time::sleep(delay).await;
        }
        self.history.lock().unwrap().push(args.clone());
        let result = {
            let mut files = self.files.lock().unwrap();
            (self.handler)(&args, &mut files)
        };
        (self.on_end)();
        result
    }
}
