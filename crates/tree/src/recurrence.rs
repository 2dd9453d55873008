use tgdh_types::{Error, Result};

use crate::KeyTree;

impl KeyTree {
    /// Raises the owner's private key all the way to the root:
    ///
    /// ```text
    /// key_path[i + 1].key  = co_path[i].bkey ^ key_path[i].key  mod p
    /// key_path[i + 1].bkey = g ^ key_path[i + 1].key            mod p   (non-root)
    /// ```
    ///
    /// Fails with [`Error::MissingBlindKey`] at the first co-path node whose
    /// blinded key has not arrived yet; the member then waits for more
    /// messages and retries. Already-derived hops recompute to the same
    /// values, so retrying is harmless.
    pub fn calculate_group_key(&mut self) -> Result<()> {
        self.ascend(usize::MAX)
    }

    /// Advances the recurrence by at most `max_hops` steps from the leaf.
    ///
    /// The level-by-level initial exchange uses this so each member only
    /// derives keys whose co-path inputs have already been published.
    pub fn initial_calculate_group_key(&mut self, max_hops: usize) -> Result<()> {
        self.ascend(max_hops)
    }

    fn ascend(&mut self, max_hops: usize) -> Result<()> {
        let me = self.me_idx()?;
        let key_path = self.key_path(me);
        let co_path = self.co_path(me);
        let hops = co_path.len().min(max_hops);

        for i in 0..hops {
            let co = self.node(co_path[i]);
            let bkey = co.bkey.clone().ok_or(Error::MissingBlindKey(co.name))?;

            let cursor = self.node(key_path[i]);
            let key = cursor.key.clone().ok_or(Error::Uninit(cursor.name))?;

            let derived = self.params.mix(&bkey, &key);
            let parent = key_path[i + 1];
            let blinded = (parent != self.root).then(|| self.params.blind(&derived));

            let node = self.node_mut(parent);

            node.key = Some(derived);

            if blinded.is_some() {
                node.bkey = blinded;
            }
        }

        Ok(())
    }
}
