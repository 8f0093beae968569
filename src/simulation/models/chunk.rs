use ahash::HashMap;
use tracing::info_span;

use crate::simulation::error::Result;

/// Splits `items` into chunks of at most `chunk_size` items. A chunk size of 0 means one chunk.
pub fn chunks<T>(items: &[T], chunk_size: usize) -> impl Iterator<Item = &[T]> {
    let size = if chunk_size == 0 {
        items.len().max(1)
    } else {
        chunk_size
    };
    items.chunks(size)
}

/// Groups `items` by key (in order of first appearance) and packs whole groups into chunks of
/// about `chunk_size` items. A group is never split, so a chunk may exceed the size if a single
/// group does.
pub fn group_chunks<T: Copy>(items: &[T], keys: &[i64], chunk_size: usize) -> Vec<Vec<T>> {
    let mut order: Vec<i64> = Vec::new();
    let mut groups: HashMap<i64, Vec<T>> = HashMap::default();
    for (&item, &key) in items.iter().zip(keys) {
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(item);
    }

    let mut result: Vec<Vec<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    for key in order {
        let group = groups.remove(&key).unwrap_or_default();
        if chunk_size > 0 && !current.is_empty() && current.len() + group.len() > chunk_size {
            result.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

/// Runs `f` on each chunk of `items` inside a span and concatenates the results.
pub fn for_each_chunk<T, R, F>(model: &str, items: &[T], chunk_size: usize, mut f: F) -> Result<Vec<R>>
where
    F: FnMut(&[T]) -> Result<Vec<R>>,
{
    let mut results = Vec::with_capacity(items.len());
    for (i, chunk) in chunks(items, chunk_size).enumerate() {
        let _span = info_span!("chunk", model, chunk = i, rows = chunk.len()).entered();
        results.extend(f(chunk)?);
    }
    Ok(results)
}
