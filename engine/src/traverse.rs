// traverse.rs — Iterative depth-first driver with exit markers
//
// Runs a depth-first walk on an explicit worklist instead of the call stack,
// so the depth of the walked structure is bounded by memory only. The
// worklist holds a one-slot `next` lookahead above an overflow stack;
// scheduling an item demotes the previous `next` onto the stack, so the last
// item a visitor schedules is visited first.
//
// Every admitted item gets an exit marker scheduled before its `enter` hook
// runs. Items scheduled by `enter` land above that marker, so `exit` fires
// exactly once per admitted item, after all of its scheduled descendants.
//
// Preconditions: the visitor's `admit` must reject items it is already inside
// of, or the walk over a cyclic structure does not terminate.
// Postconditions: every admitted item is entered once and exited once.
// Failure modes: the first hook error aborts the walk and is returned.
// Side effects: none beyond the visitor's own.

/// Worklist entry. The exit marker never escapes this module.
enum Frame<T> {
    Enter(T),
    Exit,
}

/// Pending items of a depth-first walk.
pub struct Worklist<T> {
    next: Option<Frame<T>>,
    remaining: Vec<Frame<T>>,
}

impl<T> Default for Worklist<T> {
    fn default() -> Self {
        Worklist {
            next: None,
            remaining: Vec::new(),
        }
    }
}

impl<T> Worklist<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `item`; it is visited before anything scheduled earlier.
    pub fn schedule(&mut self, item: T) {
        self.push(Frame::Enter(item));
    }

    /// Number of pending frames, exit markers included.
    pub fn len(&self) -> usize {
        self.remaining.len() + usize::from(self.next.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_none() && self.remaining.is_empty()
    }

    fn schedule_exit(&mut self) {
        self.push(Frame::Exit);
    }

    fn push(&mut self, frame: Frame<T>) {
        if let Some(previous) = self.next.replace(frame) {
            self.remaining.push(previous);
        }
    }

    fn advance(&mut self) -> Option<Frame<T>> {
        self.next.take().or_else(|| self.remaining.pop())
    }
}

/// Hooks driven by [`drive`].
pub trait DepthFirstVisitor<T> {
    type Error;

    /// Decide whether `item` is entered. A rejected item gets no exit call.
    fn admit(&mut self, item: &T) -> Result<bool, Self::Error>;

    /// Process `item`, scheduling whatever should be visited beneath it.
    fn enter(&mut self, item: T, worklist: &mut Worklist<T>) -> Result<(), Self::Error>;

    /// Called once all items scheduled beneath the most recently entered,
    /// not yet exited item have been visited.
    fn exit(&mut self) -> Result<(), Self::Error>;
}

/// Walk from `start` until the worklist drains.
pub fn drive<T, V>(start: T, visitor: &mut V) -> Result<(), V::Error>
where
    V: DepthFirstVisitor<T>,
{
    let mut worklist = Worklist::new();
    worklist.schedule(start);

    while let Some(frame) = worklist.advance() {
        match frame {
            Frame::Enter(item) => {
                if visitor.admit(&item)? {
                    worklist.schedule_exit();
                    visitor.enter(item, &mut worklist)?;
                }
            }
            Frame::Exit => visitor.exit()?,
        }
    }
    Ok(())
}
