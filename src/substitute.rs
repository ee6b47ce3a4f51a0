//! Motor de sustitución: reescribe el árbol del documento reemplazando cada
//! ocurrencia literal de un placeholder por su valor, preservando el formato
//! de los runs circundantes.
//!
//! Los contenedores ricos parten a veces un token entre varios runs
//! adyacentes (`"[CLI"` + `"ENT_NAME]"`). Por eso cada párrafo se normaliza
//! primero a un stream plano de caracteres con un mapa byte → run de origen,
//! y el emparejamiento de patrones trabaja sobre ese stream; el re-partido
//! por fronteras de run es un paso separado al emitir la salida.
//!
//! El motor es una función pura: mismo árbol y mismas sustituciones, misma
//! salida byte a byte. El árbol original no se toca.

use crate::config::UnresolvedPolicy;
use crate::document::{DocumentTree, Paragraph, Run};
use crate::session::Session;

/// Marcador que sustituye a un placeholder sin resolver bajo la política
/// `Blank`.
pub const BLANK_MARKER: &str = "_______";

/// Pares (token, valor) a sustituir, en el orden de aparición del documento.
///
/// Con la política `Retain` los placeholders sin valor no aparecen en la
/// lista y su token literal queda en la salida; con `Blank` se sustituyen
/// por [`BLANK_MARKER`]. Una misma salida nunca mezcla ambas formas.
pub fn resolved_pairs(session: &Session, policy: UnresolvedPolicy) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for placeholder in &session.placeholders {
        match session.values.get(placeholder) {
            Some(value) => pairs.push((placeholder.clone(), value.clone())),
            None => match policy {
                UnresolvedPolicy::Retain => {}
                UnresolvedPolicy::Blank => {
                    pairs.push((placeholder.clone(), BLANK_MARKER.to_string()))
                }
            },
        }
    }
    pairs
}

/// Produce un árbol nuevo con todas las sustituciones aplicadas.
pub fn apply_replacements(
    tree: &DocumentTree,
    replacements: &[(String, String)],
) -> DocumentTree {
    DocumentTree {
        paragraphs: tree
            .paragraphs
            .iter()
            .map(|p| substitute_paragraph(p, replacements))
            .collect(),
    }
}

/// Segmento del stream plano de un párrafo tras el emparejamiento.
enum Segment<'a> {
    /// Rango de bytes del stream original, sin tocar.
    Literal(std::ops::Range<usize>),
    /// Token emparejado: se emite `value` con el formato del run donde
    /// empezaba el token.
    Replaced { start: usize, value: &'a str },
}

fn substitute_paragraph(paragraph: &Paragraph, replacements: &[(String, String)]) -> Paragraph {
    if paragraph.runs.is_empty() || replacements.is_empty() {
        return paragraph.clone();
    }

    // Normalización: stream plano + mapa byte → índice de run de origen.
    let mut flat = String::new();
    let mut byte_run: Vec<usize> = Vec::new();
    for (run_idx, run) in paragraph.runs.iter().enumerate() {
        byte_run.extend(std::iter::repeat(run_idx).take(run.text.len()));
        flat.push_str(&run.text);
    }

    // Emparejamiento izquierda → derecha: en cada posición gana la
    // ocurrencia más temprana (y la de token más largo en caso de empate).
    // Los valores insertados no se re-escanean.
    let mut segments = Vec::new();
    let mut cursor = 0;
    while cursor < flat.len() {
        let mut best: Option<(usize, usize, &str)> = None; // (inicio, len token, valor)
        for (token, value) in replacements {
            if token.is_empty() {
                continue;
            }
            if let Some(offset) = flat[cursor..].find(token.as_str()) {
                let start = cursor + offset;
                let candidate = (start, token.len(), value.as_str());
                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        if start < current.0 || (start == current.0 && token.len() > current.1) {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
        }

        match best {
            Some((start, token_len, value)) => {
                if start > cursor {
                    segments.push(Segment::Literal(cursor..start));
                }
                segments.push(Segment::Replaced { start, value });
                cursor = start + token_len;
            }
            None => {
                segments.push(Segment::Literal(cursor..flat.len()));
                break;
            }
        }
    }

    // Emisión: los rangos literales se re-parten por sus fronteras de run
    // originales; cada token emparejado sale como un único run con el
    // formato del run donde empezaba.
    let mut runs = Vec::new();
    for segment in segments {
        match segment {
            Segment::Literal(range) => {
                let mut piece_start = range.start;
                while piece_start < range.end {
                    let run_idx = byte_run[piece_start];
                    let mut piece_end = piece_start;
                    while piece_end < range.end && byte_run[piece_end] == run_idx {
                        piece_end += 1;
                    }
                    runs.push(Run {
                        text: flat[piece_start..piece_end].to_string(),
                        ..format_of(&paragraph.runs[run_idx])
                    });
                    piece_start = piece_end;
                }
            }
            Segment::Replaced { start, value } => {
                if !value.is_empty() {
                    runs.push(Run {
                        text: value.to_string(),
                        ..format_of(&paragraph.runs[byte_run[start]])
                    });
                }
            }
        }
    }

    Paragraph { runs }
}

/// Run vacío con el formato (negrita, cursiva, fuente, tamaño) de `source`.
fn format_of(source: &Run) -> Run {
    Run {
        text: String::new(),
        bold: source.bold,
        italic: source.italic,
        font: source.font.clone(),
        size: source.size,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::visible_text;

    fn paragraph_of(texts: &[(&str, bool)]) -> Paragraph {
        Paragraph {
            runs: texts
                .iter()
                .map(|(text, bold)| Run {
                    text: text.to_string(),
                    bold: *bold,
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn tree_of(paragraph: Paragraph) -> DocumentTree {
        DocumentTree { paragraphs: vec![paragraph] }
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(t, v)| (t.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_full_substitution_scenario() {
        let tree = tree_of(paragraph_of(&[(
            "Agreement between [CLIENT_NAME] and [VENDOR_NAME] dated [DATE].",
            false,
        )]));
        let replacements = pairs(&[
            ("[CLIENT_NAME]", "Acme Co"),
            ("[VENDOR_NAME]", "Beta LLC"),
            ("[DATE]", "2024-01-01"),
        ]);

        let result = apply_replacements(&tree, &replacements);

        assert_eq!(
            visible_text(&result),
            "Agreement between Acme Co and Beta LLC dated 2024-01-01."
        );
    }

    #[test]
    fn test_empty_mapping_round_trip() {
        let tree = tree_of(paragraph_of(&[
            ("Texto con [TOKEN] ", true),
            ("y más texto.", false),
        ]));

        let result = apply_replacements(&tree, &[]);

        assert_eq!(result, tree);
        assert_eq!(visible_text(&result), visible_text(&tree));
    }

    #[test]
    fn test_token_split_across_runs_is_recognized() {
        // El contenedor partió "[CLIENT_NAME]" en dos runs adyacentes.
        let tree = tree_of(paragraph_of(&[
            ("Contrato de ", false),
            ("[CLI", true),
            ("ENT_NAME] firmado.", false),
        ]));
        let replacements = pairs(&[("[CLIENT_NAME]", "Acme Co")]);

        let result = apply_replacements(&tree, &replacements);

        assert_eq!(visible_text(&result), "Contrato de Acme Co firmado.");
        // El valor hereda el formato del run donde empezaba el token.
        let runs = &result.paragraphs[0].runs;
        let replaced = runs.iter().find(|r| r.text == "Acme Co").unwrap();
        assert!(replaced.bold);
        // El prefijo conserva su formato original.
        assert!(!runs[0].bold);
        assert_eq!(runs[0].text, "Contrato de ");
    }

    #[test]
    fn test_surrounding_runs_keep_their_boundaries() {
        let tree = tree_of(paragraph_of(&[
            ("Antes ", true),
            ("[X]", false),
            (" después", true),
        ]));

        let result = apply_replacements(&tree, &pairs(&[("[X]", "valor")]));

        let runs = &result.paragraphs[0].runs;
        assert_eq!(runs.len(), 3);
        assert_eq!((runs[0].text.as_str(), runs[0].bold), ("Antes ", true));
        assert_eq!((runs[1].text.as_str(), runs[1].bold), ("valor", false));
        assert_eq!((runs[2].text.as_str(), runs[2].bold), (" después", true));
    }

    #[test]
    fn test_repeated_token_replaced_everywhere() {
        let tree = tree_of(paragraph_of(&[(
            "[DATE], de nuevo [DATE] y otra vez [DATE]",
            false,
        )]));

        let result = apply_replacements(&tree, &pairs(&[("[DATE]", "hoy")]));

        assert_eq!(visible_text(&result), "hoy, de nuevo hoy y otra vez hoy");
    }

    #[test]
    fn test_inserted_values_are_not_rescanned() {
        let tree = tree_of(paragraph_of(&[("Nota: [A] y [DATE]", false)]));
        // El valor de [A] contiene el token [DATE]: no debe re-sustituirse.
        let replacements = pairs(&[("[A]", "ver [DATE]"), ("[DATE]", "2024-01-01")]);

        let result = apply_replacements(&tree, &replacements);

        assert_eq!(visible_text(&result), "Nota: ver [DATE] y 2024-01-01");
    }

    #[test]
    fn test_output_is_deterministic() {
        let tree = tree_of(paragraph_of(&[
            ("[A] ", true),
            ("[B]", false),
            (" [A]", true),
        ]));
        let replacements = pairs(&[("[A]", "uno"), ("[B]", "dos")]);

        let first = apply_replacements(&tree, &replacements);
        let second = apply_replacements(&tree, &replacements);

        assert_eq!(first, second);
    }

    #[test]
    fn test_original_tree_is_untouched() {
        let tree = tree_of(paragraph_of(&[("Hola [X]", false)]));
        let copy = tree.clone();

        let _ = apply_replacements(&tree, &pairs(&[("[X]", "mundo")]));

        assert_eq!(tree, copy);
    }

    // --- resolved_pairs y política de no-resueltos ---

    fn session_with_values(text: &str, values: &[(&str, &str)]) -> Session {
        let tree = tree_of(paragraph_of(&[(text, false)]));
        let mut session = Session::new(text.as_bytes().to_vec(), tree);
        let bindings: HashMap<String, String> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        session.merge_bindings(&bindings);
        session
    }

    #[test]
    fn test_retain_policy_keeps_literal_tokens() {
        let session =
            session_with_values("[A] y [B]", &[("[A]", "uno")]);
        let replacements = resolved_pairs(&session, UnresolvedPolicy::Retain);

        let result = apply_replacements(&session.tree, &replacements);

        assert_eq!(visible_text(&result), "uno y [B]");
    }

    #[test]
    fn test_blank_policy_marks_every_unresolved() {
        let session =
            session_with_values("[A], [B] y [C]", &[("[B]", "dos")]);
        let replacements = resolved_pairs(&session, UnresolvedPolicy::Blank);

        let result = apply_replacements(&session.tree, &replacements);

        // Nunca una mezcla: todo no-resuelto lleva el mismo marcador.
        assert_eq!(
            visible_text(&result),
            format!("{BLANK_MARKER}, dos y {BLANK_MARKER}")
        );
    }

    #[test]
    fn test_completed_bytes_are_idempotent() {
        // Mismo estado de sesión → mismos bytes descargados, byte a byte.
        let session = session_with_values("[A] y [B]", &[("[A]", "uno")]);
        let generate = || {
            let replacements = resolved_pairs(&session, UnresolvedPolicy::Retain);
            let completed = apply_replacements(&session.tree, &replacements);
            crate::document::encode(&completed).unwrap()
        };
        assert_eq!(generate(), generate());
    }

    #[test]
    fn test_pairs_follow_document_order() {
        let session = session_with_values(
            "[C] antes que [A]",
            &[("[A]", "a"), ("[C]", "c")],
        );
        let replacements = resolved_pairs(&session, UnresolvedPolicy::Retain);

        assert_eq!(
            replacements,
            pairs(&[("[C]", "c"), ("[A]", "a")])
        );
    }
}
