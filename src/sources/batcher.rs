use std::num::NonZeroUsize;

/// Groups a fallible record stream into batches of exactly `batch_size`
/// items; only the last batch may be shorter.
///
/// At most one batch is buffered. An error from the inner iterator is yielded
/// once and ends the stream; records read before it in the same batch are dropped.
#[derive(Debug)]
pub struct Batcher<I> {
    inner: I,
    batch_size: NonZeroUsize,
    done: bool,
}

impl<I> Batcher<I> {
    pub fn new(inner: I, batch_size: NonZeroUsize) -> Self {
        Self {
            inner,
            batch_size,
            done: false,
        }
    }
}

impl<I, T, E> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<Vec<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size.get());
        while batch.len() < self.batch_size.get() {
            match self.inner.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.is_empty() { None } else { Some(Ok(batch)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn batches(n: usize, size: usize) -> Vec<Vec<usize>> {
        let source = (0..n).map(Ok::<_, Infallible>);
        Batcher::new(source, NonZeroUsize::new(size).unwrap())
            .map(|b| b.unwrap())
            .collect()
    }

    #[test]
    fn test_batch_count_and_sizes() {
        for size in 1..=7 {
            for n in 0..=30 {
                let out = batches(n, size);
                assert_eq!(out.len(), n.div_ceil(size), "n={n} size={size}");
                if let Some((last, full)) = out.split_last() {
                    assert!(full.iter().all(|b| b.len() == size));
                    assert!(!last.is_empty() && last.len() <= size);
                }
                let flat: Vec<usize> = out.into_iter().flatten().collect();
                assert_eq!(flat, (0..n).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_deterministic_boundaries() {
        assert_eq!(batches(10, 3), batches(10, 3));
        assert_eq!(batches(10, 3)[3], vec![9]);
    }

    #[test]
    fn test_error_ends_stream() {
        let source = vec![Ok(1), Ok(2), Err("bad line"), Ok(4)].into_iter();
        let mut batcher = Batcher::new(source, NonZeroUsize::new(2).unwrap());
        assert_eq!(batcher.next(), Some(Ok(vec![1, 2])));
        assert_eq!(batcher.next(), Some(Err("bad line")));
        assert_eq!(batcher.next(), None);
    }

    #[test]
    fn test_pulls_lazily() {
        // An unbounded source must still yield the first batch.
        let source = (0..).map(Ok::<u64, Infallible>);
        let mut batcher = Batcher::new(source, NonZeroUsize::new(4).unwrap());
        assert_eq!(batcher.next().unwrap().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(batcher.next().unwrap().unwrap(), vec![4, 5, 6, 7]);
    }
}
