use crate::{Db, Entity};
use anyhow::Result;
use tracing::debug;

impl Db {
    /// Deletes one row. Dependents go with it through the schema's `ON DELETE CASCADE`
    /// clauses. Returns false when no row had that id.
    pub fn delete(&self, entity: Entity, id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE {}=?", entity.table(), entity.pk_column());
        let n = self.conn.execute(&sql, [id])?;
        debug!(%entity, id, deleted = n, "delete");
        Ok(n > 0)
    }
}
