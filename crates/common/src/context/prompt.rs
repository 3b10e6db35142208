//! Prompt assembly and answer cleanup

use crate::models::RetrievedFragment;

/// Answer returned when retrieval found nothing to ground on
pub const REFUSAL: &str = "La información solicitada no está disponible en los documentos.";

/// System message shared by every chat backend
pub const SYSTEM_PROMPT: &str = "Eres un asistente útil en español. Responde solo con lo que aparece en las fichas de datos de seguridad proporcionadas.";

const INSTRUCTIONS: &str = "Eres un asistente que responde en español de forma concisa y accionable.\n\
Usa exclusivamente la información del CONTEXTO. Si algo no está en el contexto, di que no está disponible.\n\
Incluye pasos claros y, al final, lista breves referencias a las fuentes.\n\n";

/// `[Fuente n: source#p{page}]` label for the n-th (1-based) context entry
pub fn source_label(n: usize, hit: &RetrievedFragment) -> String {
    format!("[Fuente {}: {}]", n, hit.fragment.citation())
}

/// Build the user prompt from at most `max_context` fragments, in result order
pub fn build_prompt(question: &str, hits: &[RetrievedFragment], max_context: usize) -> String {
    let context = hits
        .iter()
        .take(max_context)
        .enumerate()
        .map(|(i, hit)| format!("{}\n{}", source_label(i + 1, hit), hit.fragment.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}PREGUNTA: {}\n\nCONTEXTO:\n{}\n\nRESPUESTA:",
        INSTRUCTIONS,
        question.trim(),
        context
    )
}

/// Drop lines carrying document metadata (headers, revision dates, file paths)
pub fn clean_response(text: &str, markers: &[String]) -> String {
    let lowered: Vec<String> = markers.iter().map(|m| m.to_lowercase()).collect();
    text.lines()
        .filter(|line| {
            let line = line.to_lowercase();
            !lowered.iter().any(|m| !m.is_empty() && line.contains(m.as_str()))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fragment, Tier};

    fn hit(source: &str, page: u32, text: &str) -> RetrievedFragment {
        RetrievedFragment {
            fragment: Fragment::new(source, page, 0, text),
            score: 0.9,
            matched_tier: Tier::A,
        }
    }

    #[test]
    fn test_prompt_labels_sources_in_order() {
        let hits = vec![
            hit("abofol", 3, "Lavar los ojos con agua."),
            hit("amistar", 1, "Quitar la ropa contaminada."),
        ];
        let prompt = build_prompt("  ¿Qué hago si me entra en los ojos? ", &hits, 6);

        assert!(prompt.contains("PREGUNTA: ¿Qué hago si me entra en los ojos?\n"));
        let first = prompt.find("[Fuente 1: abofol#p3]").unwrap();
        let second = prompt.find("[Fuente 2: amistar#p1]").unwrap();
        assert!(first < second);
        assert!(prompt.ends_with("RESPUESTA:"));
    }

    #[test]
    fn test_prompt_respects_max_context() {
        let hits = vec![hit("a", 1, "uno"), hit("b", 1, "dos"), hit("c", 1, "tres")];
        let prompt = build_prompt("q", &hits, 2);
        assert!(prompt.contains("[Fuente 2: b#p1]"));
        assert!(!prompt.contains("[Fuente 3"));
    }

    #[test]
    fn test_clean_response_drops_metadata_lines() {
        let markers = vec!["Fecha de revisión:".to_string(), "file_path:".to_string()];
        let raw = "Lavar con agua abundante.\nFECHA DE REVISIÓN: 2021-03-01\nfile_path: data/raw/x.pdf\nAcudir al médico.";
        assert_eq!(clean_response(raw, &markers), "Lavar con agua abundante.\nAcudir al médico.");
    }
}
