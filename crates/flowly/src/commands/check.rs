//! `flowly check` -- validate a control script offline.

use flowly_core::parse_line;

use crate::cli::{CheckArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;

pub fn handle(args: &CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let content = std::fs::read_to_string(&args.script)?;

    let mut commands = 0usize;
    let mut diagnostics: Vec<(usize, &str, String)> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        match parse_line(raw) {
            Ok(Some(_)) => commands += 1,
            Ok(None) => {}
            Err(e) => diagnostics.push((idx + 1, raw.trim(), e.to_string())),
        }
    }

    match global.output {
        OutputFormat::Table => {
            for (line, content, message) in &diagnostics {
                eprintln!("{}:{line}: {message}: '{content}'", args.script.display());
            }
            if diagnostics.is_empty() && !global.quiet {
                println!("{commands} command(s) OK");
            }
        }
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "script": args.script.display().to_string(),
                "commands": commands,
                "errors": diagnostics
                    .iter()
                    .map(|(line, content, message)| serde_json::json!({
                        "line": line,
                        "content": content,
                        "message": message,
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
        }
    }

    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(CliError::ScriptInvalid {
            path: args.script.display().to_string(),
            errors: diagnostics.len(),
        })
    }
}
