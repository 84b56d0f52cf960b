/// Line-oriented text builder shared by the script and unit renderers.
#[derive(Debug, Default)]
pub struct TextBuilder {
    lines: Vec<String>,
    indent: usize,
}

impl TextBuilder {
    const INDENT: &'static str = "    ";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines
                .push(format!("{}{}", Self::INDENT.repeat(self.indent), text));
        }
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
        self
    }

    pub fn indented(&mut self, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.indent += 1;
        body(self);
        self.indent -= 1;
        self
    }

    /// Emit `open`, the body one level deeper, then `close`.
    pub fn block(
        &mut self,
        open: impl AsRef<str>,
        close: impl AsRef<str>,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.line(open);
        self.indented(body);
        self.line(close)
    }

    /// `[name]` header followed by `key=value` lines, as in systemd units.
    pub fn section<'a, I>(&mut self, name: &str, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        self.blank();
        self.line(format!("[{}]", name));
        for (key, value) in entries {
            self.line(format!("{}={}", key, value));
        }
        self
    }

    pub fn finish(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}
