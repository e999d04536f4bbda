//! Instruction text sent to the provider. The JSON schema it mandates is the
//! contract the strict-JSON normalization strategy reads.

pub const SYSTEM_PROMPT: &str = "You are an expert mathematics tutor.";

pub const DECLINE_TEMPLATE: &str = r#"{"error": "Unable to solve: reason"}"#;

pub fn solution_prompt(problem_text: &str) -> String {
    format!(
        r#"
You are a mathematics tutor AI. Please solve the following math problem step by step.

PROBLEM: {problem_text}

Please provide your response EXACTLY in the following JSON format. Do not include any text before or after the JSON:

{{
    "problem_type": "algebra|calculus|geometry|statistics|trigonometry|arithmetic|other",
    "difficulty": "elementary|middle_school|high_school|college|graduate",
    "solution": "The final answer or solution (plain text, no formatting)",
    "steps": [
        "Step 1: Clear explanation of the first step (plain text)",
        "Step 2: Clear explanation of the second step (plain text)",
        "Step 3: Continue until solved (plain text)"
    ],
    "explanation": "A clear educational explanation suitable for students (plain text)",
    "key_concepts": ["concept1", "concept2", "concept3"]
}}

IMPORTANT:
- Use ONLY plain text in all fields (no ** or __ formatting)
- Make sure the JSON is valid and properly formatted
- Include 3-5 clear, detailed steps
- Keep explanations educational and appropriate for students
- If the problem is unclear or not mathematical, respond with: {DECLINE_TEMPLATE}

Example for "2x + 5 = 15":
{{
    "problem_type": "algebra",
    "difficulty": "middle_school",
    "solution": "x = 5",
    "steps": [
        "Step 1: Subtract 5 from both sides: 2x + 5 - 5 = 15 - 5",
        "Step 2: Simplify: 2x = 10",
        "Step 3: Divide both sides by 2: x = 5"
    ],
    "explanation": "This is a linear equation that we solve by isolating the variable x using inverse operations.",
    "key_concepts": ["Linear Equations", "Inverse Operations", "Solving for Variables"]
}}
"#
    )
}
