//! Chat rendering of solutions. Output targets the legacy Markdown parse
//! mode, so model-supplied text is escaped.

use tutorbot_core::Solution;

const MARKDOWN_SPECIALS: &[char] = &['*', '_', '[', ']', '(', ')', '`'];

pub fn escape_markdown(text: &str) -> String {
    let stripped = text.replace("**", "").replace("__", "");
    let mut escaped = String::with_capacity(stripped.len());
    for ch in stripped.chars() {
        if MARKDOWN_SPECIALS.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn format_solution(solution: &Solution) -> String {
    let mut out = format!("🎯 Solution:\n{}\n\n", escape_markdown(solution.solution_text()));

    if !solution.steps().is_empty() {
        out.push_str("📋 Step-by-step explanation:\n");
        for (index, step) in solution.steps().iter().enumerate() {
            out.push_str(&format!("{}. {}\n\n", index + 1, escape_markdown(step)));
        }
    }

    if !solution.key_concepts().is_empty() {
        let concepts: Vec<String> =
            solution.key_concepts().iter().map(|concept| escape_markdown(concept)).collect();
        out.push_str(&format!("💡 Key concepts: {}\n", concepts.join(", ")));
    }

    out.trim_end().to_string()
}

pub fn format_image_solution(extracted_text: &str, solution: &Solution) -> String {
    format!(
        "*Extracted Problem:* {}\n\n{}",
        escape_markdown(extracted_text),
        format_solution(solution)
    )
}

/// Appends phrasing tips below a rendered reply.
pub fn with_tips(rendered: String, tips: &[&str]) -> String {
    if tips.is_empty() {
        return rendered;
    }

    let mut out = rendered;
    out.push_str("\n\n💡 Tips for better results:\n");
    for tip in tips {
        out.push_str(&format!("• {}\n", escape_markdown(tip)));
    }
    out.trim_end().to_string()
}
