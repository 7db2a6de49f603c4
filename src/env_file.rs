//! `.env` support: `--env-file <path>` on the command line, otherwise `./.env`
//! when present. Variables already set in the process environment win.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    /// Named on the command line rather than picked up from the working directory.
    pub explicit: bool,
}

/// Resolve the env file from CLI arguments (program name already skipped) and load it.
pub fn load_from_args(args: impl IntoIterator<Item = OsString>) -> Result<Option<LoadedEnvFile>, String> {
    match env_file_arg(args)? {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            load(&path)?;
            Ok(Some(LoadedEnvFile { path, explicit: true }))
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let path = cwd.join(".env");
            if !path.is_file() {
                return Ok(None);
            }
            load(&path)?;
            Ok(Some(LoadedEnvFile { path, explicit: false }))
        }
    }
}

fn env_file_arg(args: impl IntoIterator<Item = OsString>) -> Result<Option<PathBuf>, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let value = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            Some(s) if s.starts_with("--env-file=") => {
                let path = &s["--env-file=".len()..];
                if path.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                PathBuf::from(path)
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        if env_file.replace(value).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }

    Ok(env_file)
}

fn load(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        let Some((key, value)) = parse_line(&line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Mutating the process environment is unsafe on some targets; this
            // runs before any worker thread is started.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

/// `KEY=value`, `export KEY=value`, quoted values and trailing comments.
/// Blank lines and comment lines yield `None`.
fn parse_line(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw_value) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    Ok(Some((key.to_string(), parse_value(raw_value.trim())?)))
}

fn parse_value(raw: &str) -> Result<String, String> {
    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => return Err("unterminated escape sequence in double-quoted value".to_string()),
                },
                '"' => return closing_quote(chars.as_str(), value),
                other => value.push(other),
            }
        }
        Err("unterminated double-quoted value".to_string())
    } else if let Some(rest) = raw.strip_prefix('\'') {
        match rest.split_once('\'') {
            Some((value, remainder)) => closing_quote(remainder, value.to_string()),
            None => Err("unterminated single-quoted value".to_string()),
        }
    } else {
        let value = raw.split('#').next().unwrap_or_default().trim_end();
        Ok(value.to_string())
    }
}

fn closing_quote(remainder: &str, value: String) -> Result<String, String> {
    let remainder = remainder.trim();
    if remainder.is_empty() || remainder.starts_with('#') {
        Ok(value)
    } else {
        Err("unexpected characters after closing quote".to_string())
    }
}
