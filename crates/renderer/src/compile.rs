use std::collections::BTreeMap;
use std::fmt;

/// Host-driven inputs a fragment shader may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UniformName {
    Time,
    Resolution,
    Zoom,
    Center,
}

impl UniformName {
    pub const ALL: [UniformName; 4] = [
        UniformName::Time,
        UniformName::Resolution,
        UniformName::Zoom,
        UniformName::Center,
    ];

    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformName::Time => "iTime",
            UniformName::Resolution => "iResolution",
            UniformName::Zoom => "iZoom",
            UniformName::Center => "iCenter",
        }
    }

    /// Byte offset of the value inside the `FragreelParams` block.
    fn block_offset(self) -> u64 {
        match self {
            UniformName::Resolution => 0,
            UniformName::Time => 12,
            UniformName::Center => 16,
            UniformName::Zoom => 24,
        }
    }

    fn block_field(self) -> &'static str {
        match self {
            UniformName::Time => "_iTime",
            UniformName::Resolution => "_iResolution",
            UniformName::Zoom => "_iZoom",
            UniformName::Center => "_iCenter",
        }
    }

    fn accepts(self, ty: GlslType) -> bool {
        match self {
            UniformName::Time | UniformName::Zoom => ty == GlslType::Float,
            UniformName::Resolution => matches!(ty, GlslType::Vec2 | GlslType::Vec3),
            UniformName::Center => ty == GlslType::Vec2,
        }
    }

    fn default_type(self) -> GlslType {
        match self {
            UniformName::Time | UniformName::Zoom => GlslType::Float,
            UniformName::Resolution => GlslType::Vec3,
            UniformName::Center => GlslType::Vec2,
        }
    }

    fn from_glsl(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|uniform| uniform.glsl_name() == name)
    }
}

impl fmt::Display for UniformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlslType {
    Float,
    Vec2,
    Vec3,
}

impl GlslType {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "float" => Some(GlslType::Float),
            "vec2" => Some(GlslType::Vec2),
            "vec3" => Some(GlslType::Vec3),
            _ => None,
        }
    }
}

/// Where a resolved uniform lives and the type the shader sees it as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub offset: u64,
    pub glsl_type: GlslType,
}

/// Uniforms a program actually consumes. Names the shader never mentions are
/// absent and their values are not written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformBindings {
    slots: BTreeMap<UniformName, UniformSlot>,
}

impl UniformBindings {
    pub fn get(&self, name: UniformName) -> Option<UniformSlot> {
        self.slots.get(&name).copied()
    }

    pub fn contains(&self, name: UniformName) -> bool {
        self.slots.contains_key(&name)
    }

    pub fn names(&self) -> impl Iterator<Item = UniformName> + '_ {
        self.slots.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn insert(&mut self, name: UniformName, glsl_type: GlslType) {
        self.slots.insert(
            name,
            UniformSlot {
                offset: name.block_offset(),
                glsl_type,
            },
        );
    }
}

impl fmt::Display for UniformBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.slots.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.names().map(UniformName::glsl_name).collect();
        f.write_str(&names.join(", "))
    }
}

/// Fragment source rewritten into GLSL 450 that the wgpu front end accepts.
#[derive(Debug, Clone)]
pub struct PreparedFragment {
    pub glsl: String,
    pub bindings: UniformBindings,
}

/// Rewrites a desktop-GL style fragment shader for the uniform block layout
/// used by the renderer.
///
/// Steps performed:
///
/// 1. Blank out `#version` and `precision` lines, plus loose `uniform`
///    declarations of the host inputs (recording the declared type).
/// 2. Give global `in`/`out` declarations explicit locations.
/// 3. Rename a user `main` so our own entry point can remap `gl_FragCoord`
///    to a bottom-left origin before calling it. `mainImage` style sources are
///    called the same way with an implicit output.
/// 4. Prepend [`HEADER`] and a `#define` per host input the shader uses.
pub fn prepare_fragment(source: &str) -> PreparedFragment {
    let mut bindings = UniformBindings::default();
    let mut body = String::with_capacity(source.len());
    let mut next_input = 0u32;
    let mut next_output = 0u32;
    let mut has_main = false;

    for line in source.lines() {
        let trimmed = line.trim();
        // Stripped lines stay as blanks so `#line 1` keeps user line numbers.
        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            body.push('\n');
            continue;
        }
        if let Some((name, ty)) = host_uniform_declaration(trimmed) {
            bindings.insert(name, ty);
            body.push('\n');
            continue;
        }
        if let Some(rest) = global_interface(trimmed, "in ") {
            body.push_str(&format!("layout(location = {next_input}) in {rest}\n"));
            next_input += 1;
            continue;
        }
        if let Some(rest) = global_interface(trimmed, "out ") {
            body.push_str(&format!("layout(location = {next_output}) out {rest}\n"));
            next_output += 1;
            continue;
        }
        match rename_main(line) {
            Some(renamed) => {
                has_main = true;
                body.push_str(&renamed);
            }
            None => body.push_str(line),
        }
        body.push('\n');
    }

    for name in UniformName::ALL {
        if !bindings.contains(name) && references_identifier(&body, name.glsl_name()) {
            bindings.insert(name, name.default_type());
        }
    }

    let mut glsl = String::with_capacity(HEADER.len() + body.len() + 512);
    glsl.push_str(HEADER);
    for name in bindings.names() {
        glsl.push_str(&uniform_define(name, bindings.get(name)));
    }
    let uses_main_image = !has_main && references_identifier(&body, "mainImage");
    if uses_main_image {
        glsl.push_str("layout(location = 0) out vec4 fragreel_out_color;\n");
    }
    glsl.push_str("#line 1\n");
    glsl.push_str(&body);
    if has_main {
        glsl.push_str(MAIN_FOOTER);
    } else if uses_main_image {
        glsl.push_str(MAIN_IMAGE_FOOTER);
    }

    PreparedFragment { glsl, bindings }
}

fn uniform_define(name: UniformName, slot: Option<UniformSlot>) -> String {
    let swizzle = match slot.map(|slot| slot.glsl_type) {
        Some(GlslType::Vec2) if name == UniformName::Resolution => ".xy",
        _ => "",
    };
    format!(
        "#define {} fragreel_params.{}{}\n",
        name.glsl_name(),
        name.block_field(),
        swizzle
    )
}

/// Matches `uniform [precision] <type> <host name>;`.
fn host_uniform_declaration(trimmed: &str) -> Option<(UniformName, GlslType)> {
    let declaration = trimmed.strip_prefix("uniform ")?.strip_suffix(';')?;
    let tokens: Vec<&str> = declaration.split_whitespace().collect();
    let [.., ty, name] = tokens.as_slice() else {
        return None;
    };
    let uniform = UniformName::from_glsl(name)?;
    let ty = GlslType::parse(ty)?;
    uniform.accepts(ty).then_some((uniform, ty))
}

/// Returns the declaration after the storage keyword for global `in`/`out`
/// variables that lack an explicit layout.
fn global_interface<'a>(trimmed: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = trimmed.strip_prefix(keyword)?;
    (rest.ends_with(';') && !rest.contains('(')).then_some(rest)
}

fn rename_main(line: &str) -> Option<String> {
    let start = line.find("void main")?;
    let after = &line[start + "void main".len()..];
    if !after.trim_start().starts_with('(') {
        return None;
    }
    let mut renamed = String::with_capacity(line.len() + 16);
    renamed.push_str(&line[..start]);
    renamed.push_str("void fragreel_user_main");
    renamed.push_str(after);
    Some(renamed)
}

fn references_identifier(text: &str, ident: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    text.match_indices(ident).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + ident.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// GLSL prologue injected ahead of every fragment shader.
///
/// The block layout must match `ShaderParams` in `gpu/uniforms.rs`.
const HEADER: &str = r"#version 450
layout(std140, set = 0, binding = 0) uniform FragreelParams {
    vec3 _iResolution;
    float _iTime;
    vec2 _iCenter;
    float _iZoom;
    float _padding0;
} fragreel_params;

vec4 fragreel_frag_coord;
#define gl_FragCoord fragreel_frag_coord
";

/// Remaps the hardware fragment coordinate to a bottom-left origin and runs the user `main`.
const MAIN_FOOTER: &str = r"
void main() {
    #undef gl_FragCoord
    vec2 fragreel_builtin = gl_FragCoord.xy;
    #define gl_FragCoord fragreel_frag_coord
    fragreel_frag_coord = vec4(fragreel_builtin.x, fragreel_params._iResolution.y - fragreel_builtin.y, 0.0, 1.0);
    fragreel_user_main();
}
";

const MAIN_IMAGE_FOOTER: &str = r"
void main() {
    #undef gl_FragCoord
    vec2 fragreel_builtin = gl_FragCoord.xy;
    #define gl_FragCoord fragreel_frag_coord
    fragreel_frag_coord = vec4(fragreel_builtin.x, fragreel_params._iResolution.y - fragreel_builtin.y, 0.0, 1.0);
    vec4 color = vec4(0.0);
    mainImage(color, fragreel_frag_coord.xy);
    fragreel_out_color = color;
}
";

/// Pass-through vertex shader for the full-screen quad.
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec2 a_tex_coord;
layout(location = 0) out vec2 fragUV;

void main() {
    gl_Position = vec4(a_position, 1.0);
    fragUV = a_tex_coord;
}
";

/// Solid red shader activated whenever user code cannot be built.
pub const FALLBACK_FRAGMENT_GLSL: &str = r"#version 330 core
out vec4 FragColor;

void main() {
    FragColor = vec4(1.0, 0.0, 0.0, 1.0);
}
";
