use crate::config::types::ScrapeConfig;
use crate::pipeline::entry::{LogEntry, RawLine, ResolvedEntry};
use crate::pipeline::resolver::Resolver;
use crate::pipeline::stage::{Stage, StageError};

/// Compiled stage list of one scrape job
#[derive(Debug)]
pub struct Pipeline {
    job: String,
    stages: Vec<Stage>,
    resolver: Resolver,
}

impl Pipeline {
    pub fn compile(config: &ScrapeConfig) -> Result<Self, StageError> {
        let stages = config
            .pipeline_stages
            .iter()
            .enumerate()
            .map(|(i, stage)| Stage::compile(&i.to_string(), stage))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            job: config.job_name.clone(),
            stages,
            resolver: Resolver::compile(&config.timestamp)?,
        })
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in declared order over one entry
    pub fn run_stages(&self, entry: &mut LogEntry) {
        for stage in &self.stages {
            stage.apply(entry);
        }
    }

    pub fn process(&self, raw: RawLine) -> ResolvedEntry {
        let mut entry = LogEntry::from_raw(raw);
        self.run_stages(&mut entry);
        self.resolver.resolve(entry)
    }
}
