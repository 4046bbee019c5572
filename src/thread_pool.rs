//! Fork-join helper used to record passes in parallel.

use std::thread::ScopedJoinHandle;

/// A thread pool for parallel command recording.
///
/// Uses `std::thread::scope` for scoped parallel execution, so tasks can
/// borrow the compiled graph without reference counting.
///
/// # Example
///
/// ```
/// use render_graph::ThreadPool;
///
/// let pool = ThreadPool::new(4);
/// let squares = pool.map(&[1u32, 2, 3, 4, 5], |x| x * x);
/// assert_eq!(squares, vec![1, 4, 9, 16, 25]);
/// ```
#[derive(Debug, Clone)]
pub struct ThreadPool {
    num_threads: usize,
}

impl ThreadPool {
    /// Creates a new thread pool with the given number of worker threads.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// Creates a thread pool sized to the number of available CPU cores.
    pub fn default_threads() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Executes tasks within a scoped context.
    ///
    /// All tasks spawned within the closure are guaranteed to complete
    /// before this method returns. Tasks can borrow local variables
    /// thanks to scoped lifetimes.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'scope> FnOnce(&Scope<'scope, 'env>) -> R,
    {
        std::thread::scope(|s| {
            let scope = Scope { inner: s };
            f(&scope)
        })
    }

    /// Applies `f` to every item, spreading contiguous chunks over at most
    /// `num_threads` threads. Results come back in input order.
    ///
    /// A panic inside `f` is resumed on the calling thread.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        let threads = self.num_threads.min(items.len());
        if threads <= 1 {
            return items.iter().map(&f).collect();
        }

        let chunk_size = items.len().div_ceil(threads);
        let f = &f;
        self.scope(|s| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| s.spawn(move || chunk.iter().map(f).collect::<Vec<R>>()))
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(results) => results,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::default_threads()
    }
}

/// A scope for spawning tasks that must complete before the scope exits.
///
/// All tasks spawned within a scope are guaranteed to complete before
/// [`ThreadPool::scope`] returns.
pub struct Scope<'scope, 'env: 'scope> {
    inner: &'scope std::thread::Scope<'scope, 'env>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Spawns a task within this scope on a new thread.
    pub fn spawn<F, T>(&self, f: F) -> ScopedJoinHandle<'scope, T>
    where
        F: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope,
    {
        self.inner.spawn(f)
    }
}
