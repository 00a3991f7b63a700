//! Best-effort repair of generated scene scripts.
//!
//! Scripts arrive from an upstream generator that is usually, but not
//! reliably, well-formed. Instead of parsing Python, a fixed sequence of
//! textual rules turns the input into a runnable unit whose entry point is
//! always [`ENTRY_SCENE`]:
//!
//! 1. [`strip_fences`]: drop surrounding code-fence markup
//! 2. [`ensure_import`]: prepend [`REQUIRED_IMPORT`] if missing
//! 3. [`ensure_scene_base`]: give a base-less class the `Scene` base
//! 4. [`rename_entry_scene`]: rename the first scene class to [`ENTRY_SCENE`]
//! 5. [`ensure_entry_scene`]: append a minimal scene if there is still none
//!
//! Each rule is a pure function returning `Some(new_source)` only when it
//! changed something, and each is idempotent. Only top-level `class` lines are
//! considered; unusual formatting can defeat the heuristics.

use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

/// Scene class the renderer is always asked to render.
pub const ENTRY_SCENE: &str = "GeneratedScene";

/// Import every script needs.
pub const REQUIRED_IMPORT: &str = "from manim import *";

const SCENE_BASE: &str = "Scene";
const FENCE: &str = "```";

/// Appended when the script has no usable scene at all.
const MINIMAL_SCENE: &str = r#"class GeneratedScene(Scene):
    def construct(self):
        text = Text("Generated Animation")
        text.set_color(BLUE)
        self.play(Write(text))
        self.wait(2)
"#;

/// Used in place of the whole script when repair itself goes wrong.
const FALLBACK_TEMPLATE: &str = r#"from manim import *

class GeneratedScene(Scene):
    def construct(self):
        title = Text("Prompt-to-Video Generator", font_size=48)
        title.set_color(BLUE)

        subtitle = Text("Animation Generated Successfully!", font_size=24)
        subtitle.set_color(GREEN)
        subtitle.next_to(title, DOWN, buff=0.5)

        self.play(Write(title))
        self.wait(1)
        self.play(Write(subtitle))
        self.wait(2)

        circle = Circle(radius=2, color=YELLOW)
        circle.next_to(subtitle, DOWN, buff=1)

        self.play(Create(circle))
        self.play(circle.animate.set_color(RED))
        self.wait(1)
"#;

/// A repair applied by [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fix {
    StrippedFences,
    AddedImport,
    AddedSceneBase,
    RenamedScene,
    AppendedMinimalScene,
    /// Repair failed; the whole script was replaced by the fallback template.
    ReplacedWithTemplate,
}

impl Fix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fix::StrippedFences => "stripped_fences",
            Fix::AddedImport => "added_import",
            Fix::AddedSceneBase => "added_scene_base",
            Fix::RenamedScene => "renamed_scene",
            Fix::AppendedMinimalScene => "appended_minimal_scene",
            Fix::ReplacedWithTemplate => "replaced_with_template",
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedScript {
    pub source: String,
    pub fixes: Vec<Fix>,
}

impl NormalizedScript {
    /// Whether the fallback template replaced the input.
    pub fn used_template(&self) -> bool {
        self.fixes.contains(&Fix::ReplacedWithTemplate)
    }
}

/// Normalize a raw script. Never fails: any internal error yields the
/// fallback template.
pub fn normalize(raw: &str) -> NormalizedScript {
    let repaired = panic::catch_unwind(AssertUnwindSafe(|| apply_rules(raw)));

    match repaired {
        Ok(Ok(script)) => script,
        Ok(Err(reason)) => {
            warn!("Script repair produced an unusable result ({}), using fallback template", reason);
            template()
        }
        Err(_) => {
            warn!("Script repair panicked, using fallback template");
            template()
        }
    }
}

fn template() -> NormalizedScript {
    NormalizedScript {
        source: FALLBACK_TEMPLATE.to_string(),
        fixes: vec![Fix::ReplacedWithTemplate],
    }
}

type Rule = fn(&str) -> Option<String>;

fn apply_rules(raw: &str) -> Result<NormalizedScript, &'static str> {
    const RULES: [(Rule, Fix); 5] = [
        (strip_fences, Fix::StrippedFences),
        (ensure_import, Fix::AddedImport),
        (ensure_scene_base, Fix::AddedSceneBase),
        (rename_entry_scene, Fix::RenamedScene),
        (ensure_entry_scene, Fix::AppendedMinimalScene),
    ];

    // Line endings and surrounding blanks are not counted as repairs
    let mut source = raw.replace("\r\n", "\n").trim().to_string();
    let mut fixes = Vec::new();
    for (rule, fix) in RULES {
        if let Some(next) = rule(&source) {
            source = next;
            fixes.push(fix);
        }
    }

    let mut source = source.trim_end().to_string();
    source.push('\n');

    let has_entry = class_decls(&source)
        .any(|decl| decl.name == ENTRY_SCENE && decl.has_scene_base());
    if !has_entry {
        return Err("no renderable entry scene");
    }

    Ok(NormalizedScript { source, fixes })
}

/// Remove code-fence lines and stray fence markers, normalize line endings
/// and trim surrounding whitespace. Any of these counts as a change.
pub fn strip_fences(src: &str) -> Option<String> {
    let unified = src.replace("\r\n", "\n");
    let kept: Vec<String> = unified
        .lines()
        .filter(|line| !line.trim_start().starts_with(FENCE))
        .map(|line| line.replace(FENCE, ""))
        .collect();

    let stripped = kept.join("\n").trim().to_string();
    (stripped != src).then_some(stripped)
}

/// Prepend the required import when no line carries it.
pub fn ensure_import(src: &str) -> Option<String> {
    if src.lines().any(|line| line.trim() == REQUIRED_IMPORT) {
        return None;
    }
    Some(format!("{}\n\n{}", REQUIRED_IMPORT, src))
}

/// When no class declares a scene base, give the first base-less class the
/// `Scene` base. Classes with other bases are never touched.
pub fn ensure_scene_base(src: &str) -> Option<String> {
    if class_decls(src).any(|decl| decl.has_scene_base()) {
        return None;
    }
    let target = class_decls(src).find(|decl| decl.bases.is_none())?;

    let rewritten = format!("class {}({}):{}", target.name, SCENE_BASE, target.rest);
    Some(replace_line(src, target.line, &rewritten))
}

/// Rename the first scene class to [`ENTRY_SCENE`] unless one already has
/// that name. References to the old name elsewhere are left as they are.
pub fn rename_entry_scene(src: &str) -> Option<String> {
    if class_decls(src).any(|decl| decl.name == ENTRY_SCENE) {
        return None;
    }
    let target = class_decls(src).find(|decl| decl.has_scene_base())?;

    let bases = target.bases.unwrap_or_default();
    let rewritten = format!("class {}({}):{}", ENTRY_SCENE, bases, target.rest);
    Some(replace_line(src, target.line, &rewritten))
}

/// Append the minimal scene when no [`ENTRY_SCENE`] class exists.
pub fn ensure_entry_scene(src: &str) -> Option<String> {
    if class_decls(src).any(|decl| decl.name == ENTRY_SCENE) {
        return None;
    }
    let body = src.trim_end();
    if body.is_empty() {
        return Some(MINIMAL_SCENE.to_string());
    }
    Some(format!("{}\n\n\n{}", body, MINIMAL_SCENE))
}

/// A top-level `class Name(bases):rest` line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassDecl<'a> {
    line: usize,
    name: &'a str,
    bases: Option<&'a str>,
    rest: &'a str,
}

impl ClassDecl<'_> {
    fn has_scene_base(&self) -> bool {
        self.bases.is_some_and(|bases| {
            bases
                .split(',')
                .any(|base| base.trim().ends_with(SCENE_BASE))
        })
    }
}

fn class_decls(src: &str) -> impl Iterator<Item = ClassDecl<'_>> {
    src.lines()
        .enumerate()
        .filter_map(|(line, text)| parse_class_decl(line, text))
}

fn parse_class_decl(line: usize, text: &str) -> Option<ClassDecl<'_>> {
    let after_kw = text.strip_prefix("class")?;
    let after_ws = after_kw.trim_start();
    if after_ws.len() == after_kw.len() {
        // `classify = ...` and friends
        return None;
    }

    let name_len = after_ws
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(after_ws.len());
    if name_len == 0 {
        return None;
    }
    let (name, tail) = after_ws.split_at(name_len);
    let tail = tail.trim_start();

    let (bases, tail) = match tail.strip_prefix('(') {
        Some(inner) => {
            let close = inner.find(')')?;
            let bases = inner[..close].trim();
            let bases = (!bases.is_empty()).then_some(bases);
            (bases, inner[close + 1..].trim_start())
        }
        None => (None, tail),
    };

    let rest = tail.strip_prefix(':')?;
    Some(ClassDecl {
        line,
        name,
        bases,
        rest,
    })
}

fn replace_line(src: &str, index: usize, replacement: &str) -> String {
    src.lines()
        .enumerate()
        .map(|(i, line)| if i == index { replacement } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}
