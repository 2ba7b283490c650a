/// An overlay of textual edits on one slice of a module's source, used while
/// serialising statements so that identifiers can be renamed in place
/// without disturbing the surrounding source positions.
///
/// Positions given to [`EditBuffer::overwrite`] and [`EditBuffer::snip`] are
/// absolute byte offsets into the file the slice was taken from; the buffer
/// translates them against its base offset. Edits must not overlap.
#[derive(Debug)]
pub struct EditBuffer<'a> {
    original: &'a str,
    base: usize,
    edits: Vec<Edit>,
    prepends: Vec<String>,
    appends: Vec<String>,
    trim_output: bool,
    sourcemap_locations: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    content: String,
}

impl<'a> EditBuffer<'a> {
    /// Wraps a source slice whose first byte sits at `base` in the original
    /// file.
    pub fn new(original: &'a str, base: usize) -> Self {
        EditBuffer {
            original,
            base,
            edits: Vec::new(),
            prepends: Vec::new(),
            appends: Vec::new(),
            trim_output: false,
            sourcemap_locations: Vec::new(),
        }
    }

    /// Replaces `[start, end)` with `content`.
    pub fn overwrite(&mut self, start: usize, end: usize, content: impl Into<String>) {
        debug_assert!(start >= self.base && end <= self.base + self.original.len());
        debug_assert!(start <= end);
        self.edits.push(Edit {
            start: start - self.base,
            end: end - self.base,
            content: content.into(),
        });
    }

    /// Removes `[start, end)`.
    pub fn snip(&mut self, start: usize, end: usize) {
        self.overwrite(start, end, "");
    }

    pub fn prepend(&mut self, content: impl Into<String>) {
        self.prepends.push(content.into());
    }

    pub fn append(&mut self, content: impl Into<String>) {
        self.appends.push(content.into());
    }

    /// Strip leading and trailing whitespace from the rendered output.
    pub fn trim(&mut self) {
        self.trim_output = true;
    }

    /// Records an absolute offset a downstream source-map stage would want a
    /// mapping for. The core records statement starts; no map is produced
    /// here.
    pub fn add_sourcemap_location(&mut self, offset: usize) {
        self.sourcemap_locations.push(offset);
    }

    pub fn sourcemap_locations(&self) -> &[usize] {
        &self.sourcemap_locations
    }

    pub fn render(&self) -> String {
        let mut edits = self.edits.clone();
        edits.sort_by_key(|e| e.start);

        let mut out = String::with_capacity(self.original.len());
        for prepend in &self.prepends {
            out.push_str(prepend);
        }
        let mut cursor = 0usize;
        for edit in &edits {
            debug_assert!(cursor <= edit.start, "overlapping edits");
            out.push_str(&self.original[cursor..edit.start]);
            out.push_str(&edit.content);
            cursor = edit.end;
        }
        out.push_str(&self.original[cursor..]);
        for append in &self.appends {
            out.push_str(append);
        }

        if self.trim_output {
            out.trim().to_string()
        } else {
            out
        }
    }
}
