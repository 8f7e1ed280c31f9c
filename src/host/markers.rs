//! Statement-start line markers for scripts evaluated by the Boa host.
//!
//! Boa error objects carry no stack and its bytecode keeps no line table, so
//! the host rewrites the user's script before evaluating it: every line that
//! begins a statement gets a `__livepen_at(<line>);` call in front of it. No
//! newlines are added, so line numbers are unchanged. A line is only marked
//! where a statement can start without changing how the code around it parses;
//! anything ambiguous is left alone.

const MARK_FN: &str = "__livepen_at";

// Words after which a newline does not end the statement.
const CONTINUES: &[&str] = &[
    "var", "let", "const", "new", "typeof", "void", "delete", "in", "of", "instanceof", "return", "throw", "case",
    "default", "do", "else", "extends", "yield", "await", "async", "function", "class", "if", "for", "while", "with",
    "switch", "catch", "try", "finally", "import", "export", "static", "get", "set",
];

// Words a statement can never start with.
const NEVER_STARTS: &[&str] = &["else", "catch", "finally", "case", "default", "in", "of", "instanceof"];

// Words after which `/` starts a regular expression.
const REGEX_AFTER: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do", "else", "yield", "await",
];

const CONTROL_HEADS: &[&str] = &["if", "for", "while", "with", "switch", "catch"];

// First characters that may continue the previous line's expression.
const CONTINUATION_CHARS: &str = "([`{}])+-*/%.,?:=<>&|^!~;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Block { do_body: bool },
    Switch,
    Object,
    Paren { head: bool, switch: bool },
    Bracket,
    Template,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prev {
    Start,
    Semi,
    OpenBlock,
    CloseBlock { do_body: bool },
    CloseParen { head: bool, switch: bool },
    Arrow,
    Word(String),
    Value,
    CaseColon,
    Punct(char),
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '\u{200c}' || c == '\u{200d}'
}

fn in_statement_list(top: Option<&Scope>) -> bool {
    matches!(top, None | Some(Scope::Block { .. }) | Some(Scope::Switch))
}

fn read_word(chars: &[char], mut i: usize) -> (String, usize) {
    let start = i;
    while i < chars.len() && is_ident_part(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

fn regex_allowed(prev: &Prev) -> bool {
    match prev {
        Prev::Value | Prev::CloseParen { head: false, .. } => false,
        Prev::Word(w) => REGEX_AFTER.contains(&w.as_str()),
        _ => true,
    }
}

fn open_kind(prev: &Prev, top: Option<&Scope>) -> Scope {
    match prev {
        Prev::Start | Prev::Semi | Prev::OpenBlock | Prev::CloseBlock { .. } if in_statement_list(top) => {
            Scope::Block { do_body: false }
        }
        Prev::CloseParen { switch: true, .. } => Scope::Switch,
        Prev::CloseParen { .. } | Prev::Arrow => Scope::Block { do_body: false },
        Prev::Word(w) if w == "do" => Scope::Block { do_body: true },
        Prev::Word(w) if w == "else" || w == "try" || w == "finally" => Scope::Block { do_body: false },
        Prev::CaseColon => Scope::Block { do_body: false },
        Prev::Punct(':') if in_statement_list(top) => Scope::Block { do_body: false },
        _ => Scope::Object,
    }
}

/// Whether the line starting at `rest` should get a marker.
fn marks_line(rest: &[char], prev: &Prev, top: Option<&Scope>) -> bool {
    if !in_statement_list(top) {
        return false;
    }
    let ends_statement = match prev {
        Prev::Start | Prev::Semi | Prev::OpenBlock | Prev::CloseBlock { .. } | Prev::CaseColon => true,
        Prev::Value | Prev::CloseParen { head: false, .. } => true,
        Prev::Word(w) => !CONTINUES.contains(&w.as_str()),
        _ => false,
    };
    if !ends_statement {
        return false;
    }

    let Some(first) = rest.iter().position(|c| !matches!(c, ' ' | '\t' | '\r' | '\u{feff}' | '\u{a0}')) else {
        return false;
    };
    let c = rest[first];
    if c == '\n' || CONTINUATION_CHARS.contains(c) {
        return false;
    }
    // A marker would turn a leading string into a non-directive.
    if matches!(c, '\'' | '"') && matches!(prev, Prev::Start | Prev::OpenBlock) {
        return false;
    }
    if is_ident_start(c) {
        let (word, _) = read_word(rest, first);
        if NEVER_STARTS.contains(&word.as_str()) {
            return false;
        }
        if word == "while" && *prev == (Prev::CloseBlock { do_body: true }) {
            return false;
        }
    }
    true
}

fn push_mark(out: &mut String, line: u32) {
    out.push_str(MARK_FN);
    out.push('(');
    out.push_str(&line.to_string());
    out.push_str(");");
}

struct Marker<'a> {
    chars: &'a [char],
    out: String,
    line: u32,
}

impl Marker<'_> {
    fn copy(&mut self, from: usize, to: usize) {
        for &c in &self.chars[from..to] {
            if c == '\n' {
                self.line += 1;
            }
            self.out.push(c);
        }
    }

    // Quoted string starting at `i`; returns the index after it.
    fn string(&mut self, i: usize) -> usize {
        let quote = self.chars[i];
        let mut j = i + 1;
        while j < self.chars.len() {
            match self.chars[j] {
                '\\' => j += 2,
                '\n' => {
                    j += 1;
                    break;
                }
                c if c == quote => {
                    j += 1;
                    break;
                }
                _ => j += 1,
            }
        }
        let end = j.min(self.chars.len());
        self.copy(i, end);
        end
    }

    // Template text starting at `i` (after the backtick or the closing `}` of a
    // substitution). Returns the index after it and whether the literal closed.
    fn template(&mut self, i: usize) -> (usize, bool) {
        let mut j = i;
        while j < self.chars.len() {
            match self.chars[j] {
                '\\' => j += 2,
                '`' => {
                    self.copy(i, j + 1);
                    return (j + 1, true);
                }
                '$' if self.chars.get(j + 1) == Some(&'{') => {
                    self.copy(i, j + 2);
                    return (j + 2, false);
                }
                _ => j += 1,
            }
        }
        let end = j.min(self.chars.len());
        self.copy(i, end);
        (end, true)
    }

    fn regex(&mut self, i: usize) -> usize {
        let mut j = i + 1;
        let mut in_class = false;
        while j < self.chars.len() {
            match self.chars[j] {
                '\\' => j += 2,
                '\n' => break,
                '[' => {
                    in_class = true;
                    j += 1;
                }
                ']' => {
                    in_class = false;
                    j += 1;
                }
                '/' if !in_class => {
                    j += 1;
                    break;
                }
                _ => j += 1,
            }
        }
        while j < self.chars.len() && is_ident_part(self.chars[j]) {
            j += 1;
        }
        let end = j.min(self.chars.len());
        self.copy(i, end);
        end
    }

    fn line_comment(&mut self, i: usize) -> usize {
        let end = self.chars[i..].iter().position(|&c| c == '\n').map_or(self.chars.len(), |p| i + p);
        self.copy(i, end);
        end
    }

    fn block_comment(&mut self, i: usize) -> usize {
        let mut j = i + 2;
        while j + 1 < self.chars.len() && !(self.chars[j] == '*' && self.chars[j + 1] == '/') {
            j += 1;
        }
        let end = (j + 2).min(self.chars.len());
        self.copy(i, end);
        end
    }
}

/// Insert `__livepen_at(<line>);` before every line of `src` that starts a
/// statement. `first_line` is the number reported for the first line of `src`.
pub fn mark_statements(src: &str, first_line: u32) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut m = Marker { chars: &chars, out: String::with_capacity(src.len() + src.len() / 2), line: first_line };
    let mut stack: Vec<Scope> = Vec::new();
    let mut prev = Prev::Start;
    // Unmatched `?` count while inside a `case ...:` label
    let mut case_label: Option<u32> = None;
    let mut i = 0;

    if marks_line(&chars, &prev, stack.last()) {
        push_mark(&mut m.out, m.line);
    }

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                m.copy(i, i + 1);
                i += 1;
                if marks_line(&chars[i..], &prev, stack.last()) {
                    push_mark(&mut m.out, m.line);
                }
            }
            '\'' | '"' => {
                i = m.string(i);
                prev = Prev::Value;
            }
            '`' => {
                m.copy(i, i + 1);
                let (end, closed) = m.template(i + 1);
                i = end;
                if closed {
                    prev = Prev::Value;
                } else {
                    stack.push(Scope::Template);
                    prev = Prev::Punct('{');
                }
            }
            '/' if next == Some('/') => i = m.line_comment(i),
            '/' if next == Some('*') => i = m.block_comment(i),
            '/' if regex_allowed(&prev) => {
                i = m.regex(i);
                prev = Prev::Value;
            }
            '=' if next == Some('>') => {
                m.copy(i, i + 2);
                i += 2;
                prev = Prev::Arrow;
            }
            '{' => {
                let kind = open_kind(&prev, stack.last());
                stack.push(kind);
                prev = match kind {
                    Scope::Block { .. } | Scope::Switch => Prev::OpenBlock,
                    _ => Prev::Punct('{'),
                };
                m.copy(i, i + 1);
                i += 1;
            }
            '}' => {
                m.copy(i, i + 1);
                i += 1;
                prev = match stack.pop() {
                    Some(Scope::Template) => {
                        let (end, closed) = m.template(i);
                        i = end;
                        if closed {
                            Prev::Value
                        } else {
                            stack.push(Scope::Template);
                            Prev::Punct('{')
                        }
                    }
                    Some(Scope::Block { do_body }) => Prev::CloseBlock { do_body },
                    Some(Scope::Switch) => Prev::CloseBlock { do_body: false },
                    _ => Prev::Value,
                };
            }
            '(' => {
                let (head, switch) = match &prev {
                    Prev::Word(w) => (CONTROL_HEADS.contains(&w.as_str()), w == "switch"),
                    _ => (false, false),
                };
                stack.push(Scope::Paren { head, switch });
                prev = Prev::Punct('(');
                m.copy(i, i + 1);
                i += 1;
            }
            ')' => {
                prev = match stack.pop() {
                    Some(Scope::Paren { head, switch }) => Prev::CloseParen { head, switch },
                    _ => Prev::Value,
                };
                m.copy(i, i + 1);
                i += 1;
            }
            '[' => {
                stack.push(Scope::Bracket);
                prev = Prev::Punct('[');
                m.copy(i, i + 1);
                i += 1;
            }
            ']' => {
                stack.pop();
                prev = Prev::Value;
                m.copy(i, i + 1);
                i += 1;
            }
            ';' => {
                prev = Prev::Semi;
                m.copy(i, i + 1);
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (is_ident_part(chars[j]) || chars[j] == '.') {
                    j += 1;
                }
                m.copy(i, j);
                i = j;
                prev = Prev::Value;
            }
            c if is_ident_start(c) => {
                let (word, end) = read_word(&chars, i);
                if matches!(stack.last(), Some(Scope::Switch)) && (word == "case" || word == "default") {
                    case_label = Some(0);
                }
                m.copy(i, end);
                i = end;
                prev = Prev::Word(word);
            }
            '?' if !matches!(next, Some('.') | Some('?')) => {
                if let Some(open) = case_label.as_mut() {
                    *open += 1;
                }
                prev = Prev::Punct('?');
                m.copy(i, i + 1);
                i += 1;
            }
            ':' => {
                prev = match case_label {
                    Some(0) => {
                        case_label = None;
                        Prev::CaseColon
                    }
                    Some(open) => {
                        case_label = Some(open - 1);
                        Prev::Punct(':')
                    }
                    None => Prev::Punct(':'),
                };
                m.copy(i, i + 1);
                i += 1;
            }
            c if c.is_whitespace() => {
                m.copy(i, i + 1);
                i += 1;
            }
            c => {
                prev = Prev::Punct(c);
                m.copy(i, i + 1);
                i += 1;
            }
        }
    }
    m.out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked_lines(src: &str) -> Vec<u32> {
        let out = mark_statements(src, 1);
        out.lines()
            .enumerate()
            .filter(|(_, l)| l.trim_start().starts_with(MARK_FN))
            .map(|(n, _)| n as u32 + 1)
            .collect()
    }

    #[test]
    fn marks_each_statement_line_without_adding_lines() {
        let src = "var a = 1;\nthrow new Error('boom');";
        let out = mark_statements(src, 40);
        assert_eq!(out, "__livepen_at(40);var a = 1;\n__livepen_at(41);throw new Error('boom');");
        assert_eq!(out.lines().count(), src.lines().count());
    }

    #[test]
    fn semicolon_free_lines_are_marked() {
        assert_eq!(marked_lines("var a = 1\nthrow new Error('x')"), vec![1, 2]);
    }

    #[test]
    fn continuation_lines_are_left_alone() {
        assert_eq!(marked_lines("var a = b\n  .c()\n  (d)\nvar e = 1 +\n  2"), vec![1, 4]);
    }

    #[test]
    fn object_literals_and_arrays_are_not_marked() {
        assert_eq!(marked_lines("var o = {\n  a: 1,\n  b: [\n    2\n  ]\n};\nfoo();"), vec![1, 7]);
    }

    #[test]
    fn multi_line_template_text_is_untouched() {
        let src = "var t = `a\n${b}\nc`;\nfoo();";
        let out = mark_statements(src, 1);
        assert!(out.contains("`a\n${b}\nc`"));
        assert_eq!(marked_lines(src), vec![1, 4]);
    }

    #[test]
    fn braceless_control_bodies_are_not_split() {
        assert_eq!(marked_lines("if (x)\n  foo()\nbar()"), vec![1, 3]);
    }

    #[test]
    fn function_bodies_inside_calls_are_marked() {
        assert_eq!(marked_lines("setTimeout(function () {\n  boom();\n}, 1);"), vec![1, 2]);
        assert_eq!(marked_lines("items.forEach((x) => {\n  use(x);\n});"), vec![1, 2]);
    }

    #[test]
    fn else_catch_and_do_while_stay_attached() {
        assert_eq!(marked_lines("if (a) {\n  b();\n}\nelse {\n  c();\n}"), vec![1, 2, 5]);
        assert_eq!(marked_lines("try {\n  a();\n}\ncatch (e) {\n  b();\n}"), vec![1, 2, 5]);
        assert_eq!(marked_lines("do {\n  a();\n}\nwhile (x);\nwhile (y) {}"), vec![1, 2, 5]);
    }

    #[test]
    fn switch_cases_get_markers_only_on_statements() {
        assert_eq!(marked_lines("switch (k) {\n  case 1:\n    a();\n    break;\n  default:\n    b();\n}"), vec![1, 3, 4, 6]);
    }

    #[test]
    fn strings_comments_and_regexes_do_not_confuse_the_scan() {
        let src = "var r = /'[}]/g;\nvar s = \"{ \\\" (\";\n// {\n/* (\n */\nfoo();";
        assert_eq!(marked_lines(src), vec![1, 2, 6]);
    }

    #[test]
    fn ternaries_inside_cases_are_not_split() {
        let src = "switch (k) {\n  case a ? 1 : 2:\n    x = a ? b :\n      c;\n    break;\n}";
        assert_eq!(marked_lines(src), vec![1, 3, 5]);
    }

    #[test]
    fn directive_prologues_keep_their_meaning() {
        assert_eq!(marked_lines("function f() {\n  'use strict';\n  go();\n}"), vec![1, 3]);
    }

    #[test]
    fn class_bodies_are_not_marked_but_methods_are() {
        assert_eq!(marked_lines("class A {\n  m() {\n    go();\n  }\n}"), vec![1, 3]);
    }
}
