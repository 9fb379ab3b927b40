//! Chat template formatting.
//!
//! Models embed a Jinja chat template in `tokenizer.chat_template`. Rather than
//! evaluating Jinja, the template text is classified into one of the known
//! families by the markers it contains, and the family's formatter renders the
//! conversation. A bare family name (`"chatml"`, `"llama3"`, ...) is accepted
//! in place of template text.
//!
//! Every formatter appends the assistant generation prompt, so the rendered
//! text ends where the reply should begin.

use std::fmt::Write as _;

use llama_engine::ChatMessage;

use crate::sizing::{copy_truncated, measure_then_fill};
use crate::{TokenizerError, TokenizerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>\n`
    ChatMl,
    /// `[INST] ... [/INST]` turns.
    Llama2 {
        /// Render system messages in a `<<SYS>>` block instead of inline.
        system_block: bool,
        /// Re-open each turn after the first with `<s>[INST]`.
        bos_inside_history: bool,
        /// Trim message content.
        strip: bool,
    },
    /// `<|start_header_id|>role<|end_header_id|>\n\ncontent<|eot_id|>`
    Llama3,
    /// `<|role|>\ncontent</s>\n`
    Zephyr,
    /// `<|role|>\ncontent<|end|>\n`
    Phi3,
    /// `<start_of_turn>role\ncontent<end_of_turn>\n`, system folded into the first user turn.
    Gemma,
}

impl ChatTemplate {
    /// Classify a template name or template text.
    pub fn detect(template: &str) -> TokenizerResult<Self> {
        if let Some(t) = Self::from_name(template) {
            return Ok(t);
        }
        let has = |needle: &str| template.contains(needle);

        let detected = if has("<|im_start|>") {
            ChatTemplate::ChatMl
        } else if has("[INST]") {
            ChatTemplate::Llama2 {
                system_block: has("<<SYS>>"),
                bos_inside_history: has("bos_token + '[INST]"),
                strip: has("content.strip()"),
            }
        } else if has("<|assistant|>") && has("<|end|>") {
            ChatTemplate::Phi3
        } else if has("<|user|>") {
            ChatTemplate::Zephyr
        } else if has("<start_of_turn>") {
            ChatTemplate::Gemma
        } else if has("<|start_header_id|>") && has("<|end_header_id|>") {
            ChatTemplate::Llama3
        } else {
            return Err(TokenizerError::Template(
                "chat template is not supported".to_string(),
            ));
        };
        tracing::debug!(template = detected.name(), "chat template detected");
        Ok(detected)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let t = match name {
            "chatml" => ChatTemplate::ChatMl,
            "llama2" => ChatTemplate::Llama2 {
                system_block: false,
                bos_inside_history: false,
                strip: false,
            },
            "llama2-sys" => ChatTemplate::Llama2 {
                system_block: true,
                bos_inside_history: false,
                strip: false,
            },
            "llama3" => ChatTemplate::Llama3,
            "zephyr" => ChatTemplate::Zephyr,
            "phi3" => ChatTemplate::Phi3,
            "gemma" => ChatTemplate::Gemma,
            _ => return None,
        };
        Some(t)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatTemplate::ChatMl => "chatml",
            ChatTemplate::Llama2 {
                system_block: true, ..
            } => "llama2-sys",
            ChatTemplate::Llama2 { .. } => "llama2",
            ChatTemplate::Llama3 => "llama3",
            ChatTemplate::Zephyr => "zephyr",
            ChatTemplate::Phi3 => "phi3",
            ChatTemplate::Gemma => "gemma",
        }
    }

    /// Render `messages` with the generation prompt appended.
    pub fn render(&self, messages: &[ChatMessage]) -> TokenizerResult<String> {
        if messages.is_empty() {
            return Err(TokenizerError::Template("no messages to format".to_string()));
        }
        let mut out = String::new();
        let written = match self {
            ChatTemplate::ChatMl => render_chatml(messages, &mut out),
            ChatTemplate::Llama2 {
                system_block,
                bos_inside_history,
                strip,
            } => render_llama2(messages, *system_block, *bos_inside_history, *strip, &mut out),
            ChatTemplate::Llama3 => render_llama3(messages, &mut out),
            ChatTemplate::Zephyr => render_tagged(messages, "</s>", &mut out),
            ChatTemplate::Phi3 => render_tagged(messages, "<|end|>", &mut out),
            ChatTemplate::Gemma => render_gemma(messages, &mut out),
        };
        written.map_err(|e| {
            TokenizerError::Template(format!("failed to render {} prompt: {e}", self.name()))
        })?;
        Ok(out)
    }

    /// Write as much of the rendering as fits into `buf`; return its full length.
    pub fn render_into(&self, messages: &[ChatMessage], buf: &mut [u8]) -> TokenizerResult<usize> {
        let rendered = self.render(messages)?;
        Ok(copy_truncated(rendered.as_bytes(), buf))
    }

    /// Render through a buffer that starts at `initial_capacity` bytes and is
    /// grown to the exact size (once) if the rendering does not fit.
    pub fn apply(
        &self,
        messages: &[ChatMessage],
        initial_capacity: usize,
    ) -> TokenizerResult<String> {
        let bytes = measure_then_fill(initial_capacity, |buf: &mut [u8]| {
            self.render_into(messages, buf)
        })?;
        String::from_utf8(bytes)
            .map_err(|e| TokenizerError::Template(format!("rendered prompt is not UTF-8: {e}")))
    }
}

fn render_chatml(messages: &[ChatMessage], out: &mut String) -> std::fmt::Result {
    for m in messages {
        write!(out, "<|im_start|>{}\n{}<|im_end|>\n", m.role, m.content)?;
    }
    out.push_str("<|im_start|>assistant\n");
    Ok(())
}

fn render_llama2(
    messages: &[ChatMessage],
    system_block: bool,
    bos_inside_history: bool,
    strip: bool,
    out: &mut String,
) -> std::fmt::Result {
    out.push_str("[INST] ");
    let mut inside_turn = true;
    for m in messages {
        let content = if strip { m.content.trim() } else { m.content.as_str() };
        if !inside_turn {
            inside_turn = true;
            out.push_str(if bos_inside_history { "<s>[INST] " } else { "[INST] " });
        }
        match m.role.as_str() {
            "system" if system_block => write!(out, "<<SYS>>\n{content}\n<</SYS>>\n\n")?,
            "system" => write!(out, "{content}\n")?,
            "user" => write!(out, "{content} [/INST]")?,
            _ => {
                write!(out, "{content}</s>")?;
                inside_turn = false;
            }
        }
    }
    Ok(())
}

fn render_llama3(messages: &[ChatMessage], out: &mut String) -> std::fmt::Result {
    for m in messages {
        write!(
            out,
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            m.role,
            m.content.trim()
        )?;
    }
    out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    Ok(())
}

fn render_tagged(messages: &[ChatMessage], end: &str, out: &mut String) -> std::fmt::Result {
    for m in messages {
        write!(out, "<|{}|>\n{}{}\n", m.role, m.content, end)?;
    }
    out.push_str("<|assistant|>\n");
    Ok(())
}

fn render_gemma(messages: &[ChatMessage], out: &mut String) -> std::fmt::Result {
    let mut pending_system = String::new();
    for m in messages {
        let role = match m.role.as_str() {
            "system" => {
                pending_system.push_str(m.content.trim());
                pending_system.push_str("\n\n");
                continue;
            }
            "assistant" => "model",
            other => other,
        };
        write!(out, "<start_of_turn>{role}\n")?;
        if !pending_system.is_empty() && role == "user" {
            out.push_str(&pending_system);
            pending_system.clear();
        }
        write!(out, "{}<end_of_turn>\n", m.content.trim())?;
    }
    out.push_str("<start_of_turn>model\n");
    Ok(())
}
