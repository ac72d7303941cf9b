//! Front end of the simulated shader compiler.
//!
//! It does not generate code. It strips comments, checks that brackets
//! balance and collects the names of `kernel` entry points, which is enough
//! to give the loader real compile errors and missing-symbol failures.

/// Entry-point names declared in `source`, in declaration order.
///
/// Errors are formatted like compiler diagnostics:
/// `program_source:<line>: error: <message>`.
pub fn compile(source: &str) -> Result<Vec<String>, String> {
    let stripped = strip_comments(source)?;
    check_brackets(&stripped)?;

    let mut entry_points: Vec<String> = Vec::new();
    let tokens = tokenize(&stripped);
    for window in tokens.windows(4) {
        let [(_, kw), (_, _ret), (line, name), (_, open)] = window else {
            continue;
        };
        if *kw != "kernel" || *open != "(" || !is_identifier(name) {
            continue;
        }
        if entry_points.iter().any(|existing| existing == name) {
            return Err(diagnostic(*line, &format!("redefinition of '{name}'")));
        }
        entry_points.push((*name).to_string());
    }
    Ok(entry_points)
}

fn diagnostic(line: usize, message: &str) -> String {
    format!("program_source:{line}: error: {message}")
}

fn strip_comments(source: &str) -> Result<String, String> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line = 1;
    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        line += 1;
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                let start = line;
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        line += 1;
                    }
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err(diagnostic(start, "unterminated /* comment"));
                }
                out.push(' ');
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                out.push(c);
            }
        }
    }
    Ok(out)
}

fn check_brackets(source: &str) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        for c in text.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => return Err(diagnostic(line, &format!("unbalanced '{c}'"))),
                    }
                }
                _ => {}
            }
        }
    }
    match stack.pop() {
        Some((open, line)) => Err(diagnostic(line, &format!("'{open}' is never closed"))),
        None => Ok(()),
    }
}

/// Identifiers and single punctuation characters, tagged with their line.
fn tokenize(source: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        let mut start = None;
        for (pos, c) in text.char_indices() {
            let ident = c.is_ascii_alphanumeric() || c == '_';
            match (ident, start) {
                (true, None) => start = Some(pos),
                (false, Some(s)) => {
                    tokens.push((line, &text[s..pos]));
                    start = None;
                }
                _ => {}
            }
            if !ident && !c.is_whitespace() {
                tokens.push((line, &text[pos..pos + c.len_utf8()]));
            }
        }
        if let Some(s) = start {
            tokens.push((line, &text[s..]));
        }
    }
    tokens
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
