// Collection joins - pair documents of `b` with the `a` document their target field names.
// Output follows `b`'s order; `all` appends unmatched `a` documents in `a`'s order.

use crate::document::{document_id, shallow_merge, Document};
use crate::error::{Result, StrataError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Which `a` document (if any) each `b` document pairs with.
struct Pairing {
    partners: Vec<Option<usize>>,
    matched_a: HashSet<usize>,
}

fn pair_up(a: &[Document], b: &[Document], target_id: &str) -> Result<Pairing> {
    let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(a.len());
    for (idx, doc) in a.iter().enumerate() {
        let id = document_id(doc)?;
        if by_id.insert(id, idx).is_some() {
            return Err(StrataError::DuplicateKey {
                field: "_id".to_string(),
                value: id.to_string(),
            });
        }
    }

    let mut seen_targets: HashSet<&str> = HashSet::new();
    let mut partners = Vec::with_capacity(b.len());
    let mut matched_a = HashSet::new();

    for doc in b {
        let target = match doc.get(target_id) {
            Some(Value::String(s)) => s.as_str(),
            _ => {
                partners.push(None);
                continue;
            }
        };

        if !seen_targets.insert(target) {
            return Err(StrataError::DuplicateKey {
                field: target_id.to_string(),
                value: target.to_string(),
            });
        }

        let partner = by_id.get(target).copied();
        if let Some(idx) = partner {
            matched_a.insert(idx);
        }
        partners.push(partner);
    }

    Ok(Pairing { partners, matched_a })
}

/// Matched pairs only.
pub fn intersect(a: &[Document], b: &[Document], target_id: &str) -> Result<Vec<Document>> {
    let pairing = pair_up(a, b, target_id)?;
    Ok(b.iter()
        .zip(&pairing.partners)
        .filter_map(|(doc, partner)| partner.map(|idx| shallow_merge(&a[idx], doc)))
        .collect())
}

/// Matched pairs plus every unmatched `b` document.
pub fn superior(a: &[Document], b: &[Document], target_id: &str) -> Result<Vec<Document>> {
    let pairing = pair_up(a, b, target_id)?;
    Ok(superior_from(a, b, &pairing))
}

/// Full outer join: matched pairs plus unmatched documents from both sides.
pub fn all(a: &[Document], b: &[Document], target_id: &str) -> Result<Vec<Document>> {
    let pairing = pair_up(a, b, target_id)?;
    let mut joined = superior_from(a, b, &pairing);
    joined.extend(
        a.iter()
            .enumerate()
            .filter(|(idx, _)| !pairing.matched_a.contains(idx))
            .map(|(_, doc)| doc.clone()),
    );
    Ok(joined)
}

fn superior_from(a: &[Document], b: &[Document], pairing: &Pairing) -> Vec<Document> {
    b.iter()
        .zip(&pairing.partners)
        .map(|(doc, partner)| match partner {
            Some(idx) => shallow_merge(&a[*idx], doc),
            None => doc.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn plain(documents: Vec<Document>) -> Vec<Value> {
        documents.into_iter().map(Value::Object).collect()
    }

    #[test]
    fn test_intersect_merges_with_superior_winning() {
        let a = docs(vec![json!({"_id": "p1"})]);
        let b = docs(vec![json!({"_id": "g1", "proposal_id": "p1", "amount": 5})]);
        let joined = intersect(&a, &b, "proposal_id").unwrap();
        assert_eq!(
            plain(joined),
            vec![json!({"_id": "g1", "proposal_id": "p1", "amount": 5})]
        );
    }

    #[test]
    fn test_intersect_keeps_inferior_fields() {
        let a = docs(vec![
            json!({"_id": "p1", "title": "Ice cores", "amount": 1}),
            json!({"_id": "p2", "title": "Unfunded"}),
        ]);
        let b = docs(vec![json!({"_id": "g1", "proposal_id": "p1", "amount": 5})]);
        let joined = intersect(&a, &b, "proposal_id").unwrap();
        assert_eq!(
            plain(joined),
            vec![json!({"_id": "g1", "proposal_id": "p1", "title": "Ice cores", "amount": 5})]
        );
    }

    #[test]
    fn test_superior_keeps_unmatched_b() {
        let a = docs(vec![json!({"_id": "p1", "title": "T"}), json!({"_id": "p2"})]);
        let b = docs(vec![
            json!({"_id": "g0"}),
            json!({"_id": "g1", "proposal_id": "p1"}),
            json!({"_id": "g2", "proposal_id": "p9"}),
        ]);
        let joined = superior(&a, &b, "proposal_id").unwrap();
        assert_eq!(
            plain(joined),
            vec![
                json!({"_id": "g0"}),
                json!({"_id": "g1", "proposal_id": "p1", "title": "T"}),
                json!({"_id": "g2", "proposal_id": "p9"}),
            ]
        );
    }

    #[test]
    fn test_all_is_full_outer_join() {
        let a = docs(vec![
            json!({"_id": "p1"}),
            json!({"_id": "p2"}),
            json!({"_id": "p3"}),
        ]);
        let b = docs(vec![
            json!({"_id": "g1", "proposal_id": "p2"}),
            json!({"_id": "g2"}),
        ]);
        let matched = intersect(&a, &b, "proposal_id").unwrap();
        let joined = all(&a, &b, "proposal_id").unwrap();
        assert_eq!(joined.len(), a.len() + b.len() - matched.len());
        assert_eq!(
            plain(joined),
            vec![
                json!({"_id": "g1", "proposal_id": "p2"}),
                json!({"_id": "g2"}),
                json!({"_id": "p1"}),
                json!({"_id": "p3"}),
            ]
        );
    }

    #[test]
    fn test_all_completeness_single_pair() {
        let a = docs(vec![json!({"_id": "p1"})]);
        let b = docs(vec![json!({"_id": "g1", "proposal_id": "p1", "amount": 5})]);
        let matched = intersect(&a, &b, "proposal_id").unwrap();
        let joined = all(&a, &b, "proposal_id").unwrap();
        assert_eq!(joined.len(), a.len() + b.len() - matched.len());
    }

    #[test]
    fn test_matching_is_exact() {
        let a = docs(vec![json!({"_id": "p1"})]);
        let b = docs(vec![
            json!({"_id": "g1", "proposal_id": "P1"}),
            json!({"_id": "g2", "proposal_id": " p1"}),
        ]);
        assert!(intersect(&a, &b, "proposal_id").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_target_in_b_is_an_error() {
        let a = docs(vec![json!({"_id": "p1"})]);
        let b = docs(vec![
            json!({"_id": "g1", "proposal_id": "p1"}),
            json!({"_id": "g2", "proposal_id": "p1"}),
        ]);
        for result in [
            intersect(&a, &b, "proposal_id"),
            superior(&a, &b, "proposal_id"),
            all(&a, &b, "proposal_id"),
        ] {
            match result {
                Err(StrataError::DuplicateKey { field, value }) => {
                    assert_eq!(field, "proposal_id");
                    assert_eq!(value, "p1");
                }
                other => panic!("expected DuplicateKey, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_duplicate_id_in_a_is_an_error() {
        let a = docs(vec![json!({"_id": "p1"}), json!({"_id": "p1"})]);
        let b = docs(vec![]);
        assert!(matches!(
            all(&a, &b, "proposal_id"),
            Err(StrataError::DuplicateKey { .. })
        ));
    }
}
