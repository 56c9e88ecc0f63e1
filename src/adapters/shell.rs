//! Best-effort file-edit inference from shell commands.
//!
//! Recognized shapes: stdout redirects (`>`, `>>`) to a real path, `tee`
//! targets, in-place `sed -i` / `perl -pi` edits, and `apply_patch` envelopes.
//! Heredoc bodies are skipped. Anything else yields no edits; this module
//! never fails.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::EditKind;

static PATCH_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\*\*\* (Add|Update|Delete) File: (.+?)\s*$").expect("patch header regex")
});
static ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("assignment regex"));

/// One file touched by an `apply_patch` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchedFile {
    pub path: String,
    pub kind: EditKind,
    /// The envelope section for this file, header included.
    pub body: String,
}

/// Split an `apply_patch` envelope into per-file sections. Added files are
/// whole writes, updates and deletions are patches.
pub fn patched_files(patch: &str) -> Vec<PatchedFile> {
    let mut files: Vec<PatchedFile> = Vec::new();
    for line in patch.lines() {
        if let Some(caps) = PATCH_HEADER.captures(line) {
            let kind = if &caps[1] == "Add" {
                EditKind::Write
            } else {
                EditKind::Patch
            };
            files.push(PatchedFile {
                path: caps[2].to_string(),
                kind,
                body: format!("{}\n", line),
            });
            continue;
        }
        if line.starts_with("*** End Patch") || line.starts_with("*** Begin Patch") {
            continue;
        }
        if let Some(current) = files.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    files
}

/// Paths a shell command writes to, in order of appearance, deduplicated.
///
/// A script carrying an `apply_patch` envelope is read as the envelope only;
/// patch bodies are full of `>` that are not redirects.
pub fn written_paths(script: &str) -> Vec<String> {
    let candidates: Vec<String> = if script.contains("*** Begin Patch") {
        patched_files(script).into_iter().map(|f| f.path).collect()
    } else {
        split_commands(tokenize(script))
            .iter()
            .flat_map(command_targets)
            .collect()
    };
    let mut out: Vec<String> = Vec::new();
    for path in candidates {
        if !path.is_empty() && !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    /// `;`, `&&`, `||`, `|`, `&`, newline, subshell parens.
    Sep,
    /// `>` or `>>` on stdout.
    Redirect,
    /// Redirect of another descriptor (`2>`, `&>`); its target is not an edit.
    OtherRedirect,
    /// `<` or `<<<`.
    Input,
    /// `<<` or `<<-`; the next word is the delimiter.
    Heredoc,
}

fn tokenize(script: &str) -> Vec<Tok> {
    let chars: Vec<char> = script.chars().collect();
    let len = chars.len();
    let mut toks = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut heredocs: Vec<String> = Vec::new();
    let mut i = 0;

    fn flush(toks: &mut Vec<Tok>, word: &mut String, in_word: &mut bool, heredocs: &mut Vec<String>) {
        if *in_word {
            if toks.last() == Some(&Tok::Heredoc) {
                heredocs.push(word.clone());
            }
            toks.push(Tok::Word(std::mem::take(word)));
            *in_word = false;
        }
    }

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\'' => {
                in_word = true;
                i += 1;
                while i < len && chars[i] != '\'' {
                    word.push(chars[i]);
                    i += 1;
                }
                i += 1;
            }
            '"' => {
                in_word = true;
                i += 1;
                while i < len && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < len {
                        i += 1;
                    }
                    word.push(chars[i]);
                    i += 1;
                }
                i += 1;
            }
            '\\' => {
                if let Some(n) = next {
                    if n != '\n' {
                        word.push(n);
                        in_word = true;
                    }
                }
                i += 2;
            }
            '#' if !in_word => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            ' ' | '\t' | '\r' => {
                flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
                i += 1;
            }
            '\n' => {
                flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
                toks.push(Tok::Sep);
                i += 1;
                for delim in heredocs.drain(..) {
                    while i < len {
                        let end = chars[i..]
                            .iter()
                            .position(|&ch| ch == '\n')
                            .map_or(len, |p| i + p);
                        let line: String = chars[i..end].iter().collect();
                        i = end + 1;
                        if line.trim() == delim {
                            break;
                        }
                    }
                }
            }
            ';' | '(' | ')' | '|' => {
                flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
                toks.push(Tok::Sep);
                i += if c == '|' && next == Some('|') { 2 } else { 1 };
            }
            '&' => {
                flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
                if next == Some('>') {
                    toks.push(Tok::OtherRedirect);
                    i += 2;
                    if chars.get(i) == Some(&'>') {
                        i += 1;
                    }
                } else {
                    toks.push(Tok::Sep);
                    i += if next == Some('&') { 2 } else { 1 };
                }
            }
            '>' => {
                let tok = if in_word && !word.is_empty() && word.chars().all(|ch| ch.is_ascii_digit()) {
                    let fd = std::mem::take(&mut word);
                    in_word = false;
                    if fd == "1" {
                        Tok::Redirect
                    } else {
                        Tok::OtherRedirect
                    }
                } else {
                    flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
                    Tok::Redirect
                };
                i += 1;
                if matches!(chars.get(i), Some('>') | Some('|')) {
                    i += 1;
                }
                if chars.get(i) == Some(&'&') {
                    // descriptor duplication such as `>&2`
                    i += 1;
                    while i < len && (chars[i].is_ascii_digit() || chars[i] == '-') {
                        i += 1;
                    }
                    continue;
                }
                toks.push(tok);
            }
            '<' => {
                flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
                if next == Some('<') {
                    if chars.get(i + 2) == Some(&'<') {
                        toks.push(Tok::Input);
                        i += 3;
                    } else {
                        toks.push(Tok::Heredoc);
                        i += 2;
                        if chars.get(i) == Some(&'-') {
                            i += 1;
                        }
                    }
                } else {
                    toks.push(Tok::Input);
                    i += 1;
                }
            }
            _ => {
                word.push(c);
                in_word = true;
                i += 1;
            }
        }
    }
    flush(&mut toks, &mut word, &mut in_word, &mut heredocs);
    toks
}

struct Command {
    words: Vec<String>,
    redirects: Vec<String>,
}

fn split_commands(toks: Vec<Tok>) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut current = Command {
        words: Vec::new(),
        redirects: Vec::new(),
    };
    let mut iter = toks.into_iter().peekable();
    while let Some(tok) = iter.next() {
        match tok {
            Tok::Word(w) => current.words.push(w),
            Tok::Sep => {
                let done = std::mem::replace(
                    &mut current,
                    Command {
                        words: Vec::new(),
                        redirects: Vec::new(),
                    },
                );
                if !done.words.is_empty() || !done.redirects.is_empty() {
                    commands.push(done);
                }
            }
            Tok::Redirect => {
                if let Some(Tok::Word(_)) = iter.peek() {
                    if let Some(Tok::Word(target)) = iter.next() {
                        current.redirects.push(target);
                    }
                }
            }
            Tok::OtherRedirect | Tok::Input | Tok::Heredoc => {
                if let Some(Tok::Word(_)) = iter.peek() {
                    iter.next();
                }
            }
        }
    }
    if !current.words.is_empty() || !current.redirects.is_empty() {
        commands.push(current);
    }
    commands
}

fn command_targets(command: &Command) -> Vec<String> {
    let mut targets: Vec<String> = command
        .redirects
        .iter()
        .filter(|t| !t.starts_with("/dev/"))
        .cloned()
        .collect();

    let words: Vec<&str> = command
        .words
        .iter()
        .map(String::as_str)
        .skip_while(|w| ASSIGNMENT.is_match(w) || *w == "sudo")
        .collect();
    let Some((program, args)) = words.split_first() else {
        return targets;
    };
    let name = program.rsplit('/').next().unwrap_or(*program);

    match name {
        "tee" => targets.extend(
            args.iter()
                .filter(|a| !a.starts_with('-') && !a.starts_with("/dev/"))
                .map(|a| a.to_string()),
        ),
        "sed" | "gsed" if args.iter().any(|a| is_in_place_flag(a, false)) => {
            if let Some(last) = args.last().filter(|a| !a.starts_with('-') && args.len() >= 2) {
                targets.push(last.to_string());
            }
        }
        "perl" if args.iter().any(|a| is_in_place_flag(a, true)) => {
            if let Some(last) = args.last().filter(|a| !a.starts_with('-') && args.len() >= 2) {
                targets.push(last.to_string());
            }
        }
        _ => {}
    }
    targets
}

fn is_in_place_flag(arg: &str, perl: bool) -> bool {
    if arg == "--in-place" || arg.starts_with("--in-place=") {
        return !perl;
    }
    if arg.starts_with("--") || !arg.starts_with('-') {
        return false;
    }
    let cluster = &arg[1..];
    if perl {
        // -pi, -i, -pi.bak, -i.orig -pe
        cluster.split('.').next().is_some_and(|flags| flags.contains('i'))
    } else {
        cluster.starts_with('i')
            || cluster
                .split('.')
                .next()
                .is_some_and(|flags| flags.chars().all(|c| c.is_ascii_alphabetic()) && flags.contains('i'))
    }
}
