//! Result deduplication by document identity

use crate::retrieval::RetrievedDocument;
use ahash::AHashSet;

/// Identity of a document: digest of its source and content
pub fn document_identity(document: &RetrievedDocument) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(document.source.as_bytes());
    hasher.update(&[0]);
    hasher.update(document.content.as_bytes());
    hasher.finalize()
}

/// Drop repeated documents, keeping the first (best-ranked) instance
pub fn deduplicate_documents(documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
    let mut seen: AHashSet<blake3::Hash> = AHashSet::new();

    documents
        .into_iter()
        .filter(|document| seen.insert(document_identity(document)))
        .collect()
}
