//! The AI tutor abstraction.
//!
//! A [`TutorClient`] starts a conversational context from a captured image and
//! continues it turn by turn. The context type is opaque to the orchestrator.

use async_trait::async_trait;

use crate::capture::CapturedImage;
use crate::error::Result;

/// Persona and rules given to the model for every session.
pub const SYSTEM_INSTRUCTION: &str = r#"You are Lumiere, an advanced Socratic AI Tutor.

YOUR PRIME DIRECTIVE:
You must NEVER solve the problem for the user. You must NEVER give the final answer.

YOUR PROCESS:
1. VISION ANALYSIS: Scan the handwriting in the image. Identify the mathematical problem and the user's specific steps.
2. ERROR DETECTION: Pinpoint the exact step where logic failed (e.g., sign error, wrong formula, algebraic mistake).
3. THINKING TRACE: (Internal) Formulate why they made that mistake.
4. RESPONSE GENERATION: Generate a single, short, audible hint.
   - Bad: "You missed a negative sign on line 2, so the answer is 5."
   - Good: "Look at the second line again. How does the integration by parts formula handle the negative sign here?"

TONE:
Calm, patient, wise. Like a professor looking over a student's shoulder.

VOICE OPTIMIZATION:
- Keep responses under 20 words where possible.
- Be conversational. Use "Okay," "I see," or "Good."
- Do not dictate mathematical symbols like "integral from a to b" unless necessary. Describe them conceptually.

FORMATTING:
- Use plain text only.
- Do NOT use LaTeX formatting or dollar signs ($) for math.
- Write "x squared" instead of $x^2$.
- Write "pi" instead of $\pi$.
"#;

/// Instruction sent alongside the captured image.
pub const ANALYZE_PROMPT: &str = "Analyze the math work in this image. Identify the specific error in logic. Do NOT solve the problem. Do NOT give the answer. Instead, ask one brief, guiding question to nudge the student back on track.";

/// Request for a parallel worked example.
pub const EXAMPLE_PROMPT: &str = "Generate a similar math problem to the one in the image (same concept, different numbers). Solve this new problem step-by-step for me to learn from. Label the steps clearly. Keep it concise. Use plain text only, NO dollar signs ($) or LaTeX formatting.";

/// A conversational AI tutor.
///
/// Implementations must leave the context unchanged when a call fails.
#[async_trait]
pub trait TutorClient: Send + Sync {
    /// Conversational state for one tutoring session.
    type Context: Send + 'static;

    /// Starts a session from `image` and returns the context with the first hint.
    ///
    /// # Errors
    ///
    /// Returns `AiRequestFailed` on transport failure or when the response has no text.
    async fn start(&self, image: &CapturedImage) -> Result<(Self::Context, String)>;

    /// Sends `text` within `context` and returns the reply.
    ///
    /// # Errors
    ///
    /// Returns `EmptyInput` for blank text and `AiRequestFailed` when the
    /// request fails or the response has no text.
    async fn send(&self, context: &mut Self::Context, text: &str) -> Result<String>;

    /// Asks for a parallel worked example within `context`.
    ///
    /// # Errors
    ///
    /// Same as [`TutorClient::send`].
    async fn example(&self, context: &mut Self::Context) -> Result<String> {
        self.send(context, EXAMPLE_PROMPT).await
    }
}
