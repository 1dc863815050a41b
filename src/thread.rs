//! Execution-thread records. Each OS thread running bytecode owns one
//! `ExecThread` and registers it in the global table; the table is the
//! source of thread ids for frames and trace output.

use crate::globals::Globals;

#[derive(Debug, Clone)]
pub struct ExecThread {
    pub id: u32,
    pub trace: bool,
}

impl ExecThread {
    pub fn new() -> Self {
        ExecThread { id: 0, trace: false }
    }

    /// Registers this thread in `glob`'s table, assigning it the next id.
    /// The insert and the counter increment happen under one lock.
    pub fn add_to_table(&mut self, glob: &Globals) -> u32 {
        let mut tbl = glob.threads.lock().unwrap();
        self.id = tbl.register(self.clone());
        self.id
    }
}

impl Default for ExecThread {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ThreadTable {
    threads: Vec<ExecThread>,
    next_id: u32,
}

impl ThreadTable {
    pub fn new() -> Self {
        ThreadTable {
            threads: Vec::new(),
            next_id: 0,
        }
    }

    fn register(&mut self, mut th: ExecThread) -> u32 {
        self.next_id += 1;
        th.id = self.next_id;
        self.threads.push(th);
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn last_id(&self) -> u32 {
        self.next_id
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals;

    #[test]
    fn create_thread_has_no_id_until_registered() {
        let th = ExecThread::new();
        assert_eq!(th.id, 0);
        assert!(!th.trace);
    }

    #[test]
    fn adding_threads_assigns_monotonic_ids() {
        let glob = crate::globals::init_globals("test");
        let mut ids = Vec::new();
        for _ in 0..10 {
            let mut th = ExecThread::new();
            ids.push(th.add_to_table(&glob));
        }
        let tbl = glob.threads.lock().unwrap();
        assert_eq!(tbl.len(), 10);
        assert_eq!(tbl.last_id(), 10);
        assert_eq!(ids, (1..=10).collect::<Vec<u32>>());
    }

    // Four workers each add 100 threads to the same table; the mutex must
    // leave exactly 400 entries with no ids lost to races.
    #[test]
    fn adding_multiple_simultaneous_threads() {
        let glob = crate::globals::init_globals("test");

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let glob = glob.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut th = ExecThread::new();
                        th.add_to_table(&glob);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let tbl = glob.threads.lock().unwrap();
        assert_eq!(tbl.len(), 400);
        assert_eq!(tbl.last_id(), 400);
    }
}
