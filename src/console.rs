//! Interactive prompts.

use std::io::{self, BufRead, Write};

use crate::agent::{Plan, PlanApprover};
use crate::llm::ReferenceFile;

/// Ends the upload loop.
pub const UPLOAD_TERMINATOR: &str = "end";

/// Ends the multi-line goal.
pub const GOAL_TERMINATOR: &str = "END";

/// Line-oriented prompts over any reader/writer pair.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl Console<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn message(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{}", text)
    }

    /// Next input line without its line ending; `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn prompt(&mut self, text: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;
        self.read_line()
    }

    /// Ask a y/n question until answered. End of input counts as "no".
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        loop {
            let Some(answer) = self.prompt(&format!("{} (y/n): ", question))? else {
                return Ok(false);
            };
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.message("Please answer 'y' or 'n'.")?,
            }
        }
    }

    /// Offer previously uploaded files for reuse.
    pub fn select_existing(&mut self, files: &[ReferenceFile]) -> io::Result<Vec<ReferenceFile>> {
        if files.is_empty() {
            self.message("No previously uploaded files found.")?;
            return Ok(Vec::new());
        }

        self.message("Previously uploaded files:")?;
        for (i, file) in files.iter().enumerate() {
            self.message(&format!("  {}. {} ({})", i + 1, file.display_name, file.name))?;
        }
        if !self.confirm("Reuse any of these files?")? {
            return Ok(Vec::new());
        }

        loop {
            let Some(answer) =
                self.prompt("Enter numbers separated by commas, or 'all': ")?
            else {
                return Ok(Vec::new());
            };
            match parse_selection(&answer, files.len()) {
                Some(indices) => return Ok(indices.into_iter().map(|i| files[i].clone()).collect()),
                None => self.message(&format!(
                    "Invalid selection. Use numbers between 1 and {}, or 'all'.",
                    files.len()
                ))?,
            }
        }
    }

    /// Next path or glob to upload; `None` once the user types the terminator.
    pub fn next_upload_input(&mut self) -> io::Result<Option<String>> {
        loop {
            let Some(line) = self.prompt(&format!(
                "File path or glob to upload ('{}' to finish): ",
                UPLOAD_TERMINATOR
            ))?
            else {
                return Ok(None);
            };
            let line = line.trim();
            if line.eq_ignore_ascii_case(UPLOAD_TERMINATOR) {
                return Ok(None);
            }
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }

    /// Multi-line goal, read until a line containing only the terminator.
    pub fn read_goal(&mut self) -> io::Result<String> {
        self.message(&format!(
            "Describe your goal. Finish with a line containing only '{}':",
            GOAL_TERMINATOR
        ))?;
        let mut lines = Vec::new();
        while let Some(line) = self.read_line()? {
            if line.trim() == GOAL_TERMINATOR {
                break;
            }
            lines.push(line);
        }
        Ok(lines.join("\n").trim().to_string())
    }

    pub fn show_plan(&mut self, plan: &Plan) -> io::Result<()> {
        self.message(&format!("\nProposed plan ({} step(s)):", plan.len()))?;
        for (i, step) in plan.iter().enumerate() {
            self.message(&format!("  {}. {}", i + 1, step))?;
        }
        Ok(())
    }
}

impl<R: BufRead, W: Write> PlanApprover for Console<R, W> {
    fn approve(&mut self, plan: &Plan) -> bool {
        let answer = self
            .show_plan(plan)
            .and_then(|_| self.confirm("Execute this plan?"));
        match answer {
            Ok(approved) => approved,
            Err(e) => {
                tracing::warn!("Could not read plan approval: {}", e);
                false
            }
        }
    }
}

/// Zero-based indices from "1,3" style input (1-based) or "all".
///
/// Duplicates are dropped; any out-of-range or non-numeric item rejects
/// the whole selection.
pub fn parse_selection(input: &str, count: usize) -> Option<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Some((0..count).collect());
    }

    let mut indices = Vec::new();
    for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let n: usize = item.parse().ok()?;
        if n == 0 || n > count {
            return None;
        }
        if !indices.contains(&(n - 1)) {
            indices.push(n - 1);
        }
    }
    if indices.is_empty() {
        None
    } else {
        Some(indices)
    }
}
