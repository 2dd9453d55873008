use alloc::string::String;
use core::fmt;

use num_bigint::BigUint;
use tgdh_types::fingerprint;

use crate::node::NodeIdx;
use crate::KeyTree;

fn short(value: &BigUint) -> String {
    hex::encode(&fingerprint(value)[..4])
}

impl KeyTree {
    fn node_line(&self, idx: NodeIdx) -> String {
        use core::fmt::Write as _;

        let node = self.node(idx);
        let mut line = String::new();

        let _ = write!(line, "{} {}", node.name, node.kind);

        if let Some(mid) = node.mid {
            let _ = write!(line, " {mid}");
        }

        if self.me == Some(idx) {
            let _ = write!(line, " (me)");
        }

        match &node.key {
            Some(key) => {
                let _ = write!(line, " key:#{}", short(key));
            }
            None => {
                let _ = write!(line, " key:-");
            }
        }

        match &node.bkey {
            Some(bkey) => {
                let _ = write!(line, " bkey:#{}", short(bkey));
            }
            None => {
                let _ = write!(line, " bkey:-");
            }
        }

        line
    }

    fn render_subtree(
        &self,
        f: &mut fmt::Formatter<'_>,
        idx: NodeIdx,
        prefix: &str,
        last: bool,
    ) -> fmt::Result {
        let (branch, extend) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };

        writeln!(f, "{prefix}{branch}{}", self.node_line(idx))?;

        if let (Some(l), Some(r)) = (self.node(idx).left, self.node(idx).right) {
            let child_prefix = alloc::format!("{prefix}{extend}");

            self.render_subtree(f, l, &child_prefix, false)?;
            self.render_subtree(f, r, &child_prefix, true)?;
        }

        Ok(())
    }

    /// A verbose dump of every node, for debug logs.
    pub fn describe_nodes(&self) -> String {
        use core::fmt::Write as _;

        let mut out = String::new();

        for idx in self.preorder() {
            let node = self.node(idx);

            let _ = writeln!(out, "{}", self.node_line(idx));

            if let Some(parent) = node.parent {
                let _ = writeln!(out, "  parent: {}", self.node(parent).name);
            }

            if let (Some(l), Some(r)) = (node.left, node.right) {
                let _ = writeln!(
                    out,
                    "  children: {} {}",
                    self.node(l).name,
                    self.node(r).name
                );
            }
        }

        out
    }
}

/// Renders the tree with box-drawing branches. Keys appear as fingerprints,
/// never as raw integers.
impl fmt::Display for KeyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.node_line(self.root))?;

        if let (Some(l), Some(r)) = (self.node(self.root).left, self.node(self.root).right) {
            self.render_subtree(f, l, "", false)?;
            self.render_subtree(f, r, "", true)?;
        }

        Ok(())
    }
}
