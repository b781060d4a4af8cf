//! Repair prompts and the policies that answer them.
//!
//! Every repair the checker can make is gated by one [`Prompt`]. The prompt
//! names the rule that fired, the owner and block involved, and the values
//! before and after the fix, so a non-interactive policy can answer it
//! deterministically.
use std::collections::VecDeque;
use std::io::{BufRead, Write};

use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Problem {
    ExtentBlockBlkno,
    ExtentBlockGeneration,
    ExtentBlockGenerationFix,
    ExtentListDepth,
    ExtentListCount,
    ExtentListNextFree,
    ExtentBlockInvalid,
    ExtentBlknoRange,
    ExtentBlknoUnaligned,
    ExtentClustersOverrun,
    ExtentMarkedUnwritten,
    ExtentMarkedRefcounted,
    XattrBlockInvalid,
    RefcountBlockBlkno,
    RefcountBlockGeneration,
    RefcountBlockGenerationFix,
    RefcountBlockParent,
    RefcountBlockInvalid,
    RefcountListEmpty,
    RefcountClusters,
    RefcountRootBlockInvalid,
}

impl Problem {
    /// Stable code shown in brackets before each question.
    pub fn code(&self) -> &'static str {
        match self {
            Problem::ExtentBlockBlkno => "EB_BLKNO",
            Problem::ExtentBlockGeneration => "EB_GEN",
            Problem::ExtentBlockGenerationFix => "EB_GEN_FIX",
            Problem::ExtentListDepth => "EXTENT_LIST_DEPTH",
            Problem::ExtentListCount => "EXTENT_LIST_COUNT",
            Problem::ExtentListNextFree => "EXTENT_LIST_FREE",
            Problem::ExtentBlockInvalid => "EXTENT_EB_INVALID",
            Problem::ExtentBlknoRange => "EXTENT_BLKNO_RANGE",
            Problem::ExtentBlknoUnaligned => "EXTENT_BLKNO_UNALIGNED",
            Problem::ExtentClustersOverrun => "EXTENT_CLUSTERS_OVERRUN",
            Problem::ExtentMarkedUnwritten => "EXTENT_MARKED_UNWRITTEN",
            Problem::ExtentMarkedRefcounted => "EXTENT_MARKED_REFCOUNTED",
            Problem::XattrBlockInvalid => "XATTR_BLOCK_INVALID",
            Problem::RefcountBlockBlkno => "RB_BLKNO",
            Problem::RefcountBlockGeneration => "RB_GEN",
            Problem::RefcountBlockGenerationFix => "RB_GEN_FIX",
            Problem::RefcountBlockParent => "RB_PARENT",
            Problem::RefcountBlockInvalid => "REFCOUNT_BLOCK_INVALID",
            Problem::RefcountListEmpty => "REFCOUNT_LIST_EMPTY",
            Problem::RefcountClusters => "REFCOUNT_CLUSTERS",
            Problem::RefcountRootBlockInvalid => "REFCOUNT_ROOT_BLOCK_INVALID",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptValue {
    pub name: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub problem: Problem,
    /// Block number of the object that owns the tree.
    pub owner: u64,
    /// Block holding the field the repair would change.
    pub location: u64,
    pub message: String,
    pub values: Vec<PromptValue>,
}

impl Prompt {
    pub fn new(problem: Problem, owner: u64, location: u64, message: String) -> Self {
        Prompt {
            problem,
            owner,
            location,
            message,
            values: Vec::new(),
        }
    }

    pub fn value(mut self, name: &'static str, value: u64) -> Self {
        self.values.push(PromptValue { name, value });
        self
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    /// The named values as `name=value` pairs, space separated.
    pub fn values_string(&self) -> String {
        self.values
            .iter()
            .map(|v| format!("{}={}", v.name, v.value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Decides whether an offered repair is applied.
pub trait Confirm {
    fn confirm(&mut self, prompt: &Prompt) -> bool;
}

/// Gives the same answer to every prompt (`-y` / `-n`).
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub bool);

impl Confirm for Fixed {
    fn confirm(&mut self, _prompt: &Prompt) -> bool {
        self.0
    }
}

/// Answers from a queue, then falls back to a default.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    answers: VecDeque<bool>,
    default: bool,
}

impl Scripted {
    pub fn new<I: IntoIterator<Item = bool>>(answers: I, default: bool) -> Self {
        Scripted {
            answers: answers.into_iter().collect(),
            default,
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Confirm for Scripted {
    fn confirm(&mut self, _prompt: &Prompt) -> bool {
        self.answers.pop_front().unwrap_or(self.default)
    }
}

impl<F: FnMut(&Prompt) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &Prompt) -> bool {
        self(prompt)
    }
}

/// Asks a person. An empty answer takes the default of yes; end of input
/// declines.
pub struct Interactive<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Interactive<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Interactive { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for Interactive<R, W> {
    fn confirm(&mut self, prompt: &Prompt) -> bool {
        loop {
            if write!(
                self.output,
                "[{}] {} <y> ",
                prompt.problem.code(),
                prompt.message
            )
            .and_then(|_| self.output.flush())
            .is_err()
            {
                return false;
            }

            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    warn!("no answer for [{}], declining", prompt.problem.code());
                    return false;
                }
                Ok(_) => {}
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" | "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => continue,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub code: &'static str,
    pub prompt: Prompt,
    pub accepted: bool,
}

/// Logs every prompt before it is answered and keeps the outcome.
pub struct Recorder<C: Confirm> {
    inner: C,
    findings: Vec<Finding>,
}

impl<C: Confirm> Recorder<C> {
    pub fn new(inner: C) -> Self {
        Recorder {
            inner,
            findings: Vec::new(),
        }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    pub fn accepted(&self) -> usize {
        self.findings.iter().filter(|f| f.accepted).count()
    }

    pub fn declined(&self) -> usize {
        self.findings.len() - self.accepted()
    }
}

impl<C: Confirm> Confirm for Recorder<C> {
    fn confirm(&mut self, prompt: &Prompt) -> bool {
        info!("[{}] {}", prompt.problem.code(), prompt.message);
        if !prompt.values.is_empty() {
            info!("[{}] {}", prompt.problem.code(), prompt.values_string());
        }
        let accepted = self.inner.confirm(prompt);
        info!(
            "[{}] {}",
            prompt.problem.code(),
            if accepted { "fixed" } else { "left as is" }
        );
        self.findings.push(Finding {
            code: prompt.problem.code(),
            prompt: prompt.clone(),
            accepted,
        });
        accepted
    }
}
