use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source directories held to the policy below. The build script itself is exempt.
const SOURCE_ROOTS: [&str; 4] = ["l1l2", "cli", "tests", "benches"];

/// A source rule: a line regex plus the message printed when it matches.
struct Policy {
    pattern: &'static str,
    description: &'static str,
    advice: &'static str,
    // Ignore matches inside comments and string literals.
    code_only: bool,
}

const POLICIES: [Policy; 2] = [
    Policy {
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        description: "underscore-prefixed identifiers",
        advice: "Either use the binding (removing the underscore) or remove it completely.",
        code_only: true,
    },
    Policy {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        description: "#[allow(dead_code)] attributes",
        advice: "Either use the code (removing the attribute) or remove it completely.",
        code_only: false,
    },
];

// Collects the matching lines of one file for a single policy.
struct ViolationCollector {
    violations: Vec<String>,
    code_only: bool,
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.code_only && !has_underscore_identifier(&code_portion(line_text)) {
            return Ok(true);
        }

        // Same format as `rg -n`.
        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

// The line without string literals and without a trailing line comment.
fn code_portion(line: &str) -> String {
    let code: String = line
        .split('"')
        .step_by(2)
        .collect::<Vec<_>>()
        .join(" ");
    match code.find("//") {
        Some(start) => code[..start].to_string(),
        None => code,
    }
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn has_underscore_identifier(code: &str) -> bool {
    let chars: Vec<char> = code.chars().collect();
    chars.iter().enumerate().any(|(i, &c)| {
        c == '_'
            && (i == 0 || !is_word(chars[i - 1]))
            && chars.get(i + 1).is_some_and(|&next| is_word(next))
    })
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_ROOTS.into_iter().flat_map(|root| {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn check_policy(policy: &Policy, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(policy.pattern)?;
    let mut searcher = Searcher::new();

    for path in files {
        let mut collector = ViolationCollector {
            violations: Vec::new(),
            code_only: policy.code_only,
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            return Err(format_violations(policy, path, &collector.violations).into());
        }
    }
    Ok(())
}

fn format_violations(policy: &Policy, path: &Path, violations: &[String]) -> String {
    let mut message = format!(
        "\n❌ ERROR: Found {} {} in {}:\n",
        violations.len(),
        policy.description,
        path.display()
    );
    for violation in violations {
        message.push_str(&format!("   {violation}\n"));
    }
    message.push_str(&format!(
        "\n⚠️ {} are not allowed in this project.\n   {}\n",
        policy.description, policy.advice
    ));
    message
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    let files: Vec<PathBuf> = rust_sources().collect();
    for policy in &POLICIES {
        if let Err(e) = check_policy(policy, &files) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
