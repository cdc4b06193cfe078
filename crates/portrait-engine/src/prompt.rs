//! Instruction text for the image service.
//!
//! Generation prompts always have the same three sections in the same order:
//! the identity hard-lock (constant policy), the semantic scene and the
//! technical execution. Output is a pure function of the inputs, so the same
//! features always produce byte-identical text.

use portrait_contracts::features::{SemanticFields, TechnicalFields};
use sha2::{Digest, Sha256};

pub const IDENTITY_LOCK_HEADING: &str = "1. IDENTITY HARD-LOCK (ANCHOR)";
pub const SEMANTIC_HEADING: &str = "2. SCENE ARCHITECTURE (SEMANTIC INTENT)";
pub const TECHNICAL_HEADING: &str = "3. TECHNICAL EXECUTION (MASTER CONTROLS)";

pub const ATTIRE_REFERENCE_CLAUSE: &str = "CRITICAL: Use the second image provided as the strict reference for the subject's ATTIRE. Apply the clothing from the reference image to the subject and nothing else from it.";

const ENGINE_BANNER: &str = "STUDIO PORTRAIT ENGINE v3.0";

const IDENTITY_LOCK: &str = "\
- BIOMETRIC DNA: Map the source face pixel-for-pixel. Keep the exact eye geometry, iris pigmentation, nose bridge structure and jawline contour.
- MICRO-TEXTURE: Keep every natural landmark (moles, birthmarks, skin grain). No AI smoothing, no beautification.
- EYEWEAR PROTOCOL: If the subject wears glasses, keep the EXACT frame geometry, material and color. CRITICAL: Replace the lenses with ultra-clear, anti-reflective studio glass; remove any tint, transition or sunglass shading.
- CULTURAL FIDELITY: Reproduce religious headwear (hijab, turban, etc.) and the original hair texture and growth pattern with full accuracy. Headwear fabric color must coordinate with the selected attire and color grade.";

const SEMANTIC_PREAMBLE: &str = "\
This section defines mood, persona, attire and environment only.
Do NOT infer camera, lighting, optics, framing or rendering behavior from this section.
Match the attire to a gender-appropriate attire profile (masculine, feminine).";

const LIGHTING_DIRECTIVE: &str = "- LIGHTING: Professional studio Rembrandt setup. 45-degree key light with precise catchlights in the irises. Zero harsh shadows.";

const ORIENTATION_DIRECTIVE: &str = "- ORIENTATION: Head and shoulders face the camera directly with no head tilt; eyes look straight into the lens.";

const TECHNICAL_CLOSING: &str = "\
- TEXTURE: Hyper-realistic 8k photography. Authentic skin translucency and realistic fabric weave.
- COMPOSITION: Professional medium close-up headshot framing.

QUALITY:
Professional photography asset suitable for a professional profile.
No hallucinations, no identity drift, no AI smoothing, no stylization.";

fn semantic_block(fields: &SemanticFields<'_>) -> String {
    format!(
        "- Persona: Professional with a {} expression.\n- Environment: {}.\n- Attire: {}.\n- Presentation: {}.",
        fields.expression.label(),
        fields.background.trim(),
        fields.attire.label().trim(),
        fields.grooming.label(),
    )
}

fn technical_block(fields: &TechnicalFields<'_>) -> String {
    format!(
        "- Angle: {}.\n- Framing: {}.\n- Lens/Depth: {}.\n- Grade: {}.",
        fields.camera_angle.trim(),
        fields.pose.trim(),
        fields.lens_depth.trim(),
        fields.color_grade.trim(),
    )
}

/// Full first-generation instruction.
pub fn compose(
    semantic: &SemanticFields<'_>,
    technical: &TechnicalFields<'_>,
    has_attire_reference: bool,
) -> String {
    let mut text = format!(
        "{ENGINE_BANNER}\n\n\
         {IDENTITY_LOCK_HEADING}\n{IDENTITY_LOCK}\n\n\
         {SEMANTIC_HEADING}\n{SEMANTIC_PREAMBLE}\n{semantic}\n\n\
         {TECHNICAL_HEADING}\n{LIGHTING_DIRECTIVE}\n{ORIENTATION_DIRECTIVE}\n\
         - OPTICS & DEPTH:\n{technical}\n\
         This defines depth behavior only. No lens distortion, no stylization. \
         Sharp high-frequency focus on the eyes is mandatory.\n\
         {TECHNICAL_CLOSING}",
        semantic = semantic_block(semantic),
        technical = technical_block(technical),
    );
    if has_attire_reference {
        text.push_str("\n\n");
        text.push_str(ATTIRE_REFERENCE_CLAUSE);
    }
    text
}

/// Retouch instruction for a follow-up edit: the delta plus the constraints
/// that keep the established identity and lighting.
pub fn compose_edit(instruction: &str) -> String {
    format!(
        "RETOUCHING LAYER: {}.\n\n\
         CRITICAL CONSTRAINTS:\n\
         - Maintain 100% identity hard-lock (face, eyewear frames, features).\n\
         - Preserve existing studio lighting and camera optics.\n\
         - Apply ONLY the requested delta change.",
        instruction.trim().trim_end_matches('.'),
    )
}

/// Short stable digest of an instruction, for logs and listings.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..6])
}

/// Rough token count the way the studio panel shows it: a quarter of the chars.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}
