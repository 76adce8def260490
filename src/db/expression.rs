//! Lua predicates over query results.
//!
//! An expression such as `variant.exac_af == nil or variant.exac_af < 0.01`
//! is compiled once per query and called with a `variant` global for every
//! reconstructed record.

use mlua::prelude::LuaValue;
use mlua::{AnyUserData, Lua, MetaMethod, UserDataFields, UserDataMethods, Value};

use crate::error::{Result, VariantStoreError};
use crate::variant::{CallInfoField, VariantRecord};

pub struct ExprVariant(pub VariantRecord);

fn register_variant(lua: &Lua) -> mlua::Result<()> {
    lua.register_userdata_type::<ExprVariant>(|reg| {
        reg.add_meta_function(
            MetaMethod::Index,
            |_lua, (_, name): (AnyUserData, String)| {
                let msg = format!("variant has no field '{}'", name);
                Err::<LuaValue<'_>, mlua::Error>(mlua::Error::RuntimeError(msg))
            },
        );
        reg.add_field_method_get("chrom", |_, this: &ExprVariant| {
            Ok(this.0.reference_name.clone())
        });
        reg.add_field_method_get("pos", |_, this: &ExprVariant| Ok(this.0.start));
        reg.add_field_method_get("start", |_, this: &ExprVariant| Ok(this.0.start));
        reg.add_field_method_get("stop", |_, this: &ExprVariant| Ok(this.0.end));
        reg.add_field_method_get("REF", |_, this: &ExprVariant| {
            Ok(this.0.reference_bases.clone())
        });
        reg.add_field_method_get("ALT", |_, this: &ExprVariant| {
            Ok(this.0.alternate_bases.clone())
        });
        reg.add_field_method_get("gene", |_, this: &ExprVariant| {
            Ok(this.0.gene().map(|s| s.to_string()))
        });
        reg.add_field_method_get("effect", |_, this: &ExprVariant| {
            Ok(this.0.gene_effect().map(|s| s.to_string()))
        });
        reg.add_field_method_get("exac_af", |_, this: &ExprVariant| Ok(this.0.exac_af()));
        reg.add_field_method_get("qual", |_, this: &ExprVariant| {
            let q = this.0.call_info(CallInfoField::Quality);
            Ok(q.and_then(|q| q.parse::<f64>().ok()))
        });
        reg.add_field_method_get("filter", |_, this: &ExprVariant| {
            Ok(this.0.call_info(CallInfoField::Filter).map(|s| s.to_string()))
        });
        reg.add_field_method_get("genotype", |lua: &Lua, this: &ExprVariant| {
            match this.0.call() {
                Some(call) => {
                    let t = lua.create_table_with_capacity(2, 0)?;
                    t.raw_set(1, call.genotype.alleles.0)?;
                    t.raw_set(2, call.genotype.alleles.1)?;
                    Ok(Value::Table(t))
                }
                None => Ok(Value::Nil),
            }
        });
        reg.add_field_method_get("phased", |_, this: &ExprVariant| {
            Ok(this.0.call().map(|c| c.genotype.phased))
        });
        reg.add_method("score", |_, this: &ExprVariant, name: String| {
            match CallInfoField::score_from_name(&name) {
                Some(field) => Ok(this.0.score(field)),
                None => Err(mlua::Error::RuntimeError(format!(
                    "unknown score '{}'",
                    name
                ))),
            }
        });
    })
}

/// A compiled predicate bound to its own interpreter.
pub struct VariantExpression {
    lua: Lua,
    func: mlua::RegistryKey,
    source: String,
}

impl VariantExpression {
    pub fn compile(source: &str) -> Result<Self> {
        let lua = Lua::new();
        register_variant(&lua)?;
        let code = if source.trim_start().starts_with("return ") {
            source.to_string()
        } else {
            format!("return {}", source)
        };
        let func = lua
            .load(code)
            .set_name(source)
            .into_function()
            .map_err(|e| VariantStoreError::Expression(format!("{}: {}", source, e)))?;
        let func = lua.create_registry_value(func)?;
        Ok(VariantExpression {
            lua,
            func,
            source: source.to_string(),
        })
    }

    /// Evaluate against one record; anything but a boolean is an error.
    pub fn matches(&self, record: VariantRecord) -> Result<(bool, VariantRecord)> {
        let mut variant = ExprVariant(record);
        let func: mlua::Function = self.lua.registry_value(&self.func)?;
        let globals = self.lua.globals();
        let result = self.lua.scope(|scope| {
            globals.raw_set("variant", scope.create_any_userdata_ref_mut(&mut variant)?)?;
            func.call::<_, Value>(())
        })?;
        match result {
            Value::Boolean(b) => Ok((b, variant.0)),
            other => Err(VariantStoreError::Expression(format!(
                "{} returned {} instead of a boolean",
                self.source,
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotypes::Genotype;
    use crate::variant::{Call, VariantInfoField};

    fn record() -> VariantRecord {
        let mut call = Call::new(Genotype::new(0, 1, true));
        call.info.set(CallInfoField::Quality, "37.5");
        call.info.set(CallInfoField::Filter, "PASS");
        call.info.set(CallInfoField::ExomiserVariantScore, "0.91");
        let mut rec = VariantRecord::new("X", 500, "G", vec!["A".to_string()], call).unwrap();
        rec.info.set(VariantInfoField::Gene, "DMD");
        rec.info.set(VariantInfoField::GeneEffect, "STOP_GAINED");
        rec
    }

    fn eval(expr: &str) -> bool {
        VariantExpression::compile(expr)
            .unwrap()
            .matches(record())
            .unwrap()
            .0
    }

    #[test]
    fn test_fields() {
        assert!(eval("variant.chrom == 'X' and variant.pos == 500 and variant.stop == 501"));
        assert!(eval("variant.gene == 'DMD' and variant.effect == 'STOP_GAINED'"));
        assert!(eval("variant.exac_af == nil"));
        assert!(eval("variant.qual > 30 and variant.filter == 'PASS'"));
        assert!(eval("variant.genotype[2] == 1 and variant.phased"));
        assert!(eval("variant.ALT[1] == 'A' and variant.REF == 'G'"));
        assert!(eval("return variant:score('exomiser_variant_score') > 0.9"));
        assert!(!eval("variant:score('EXOMISER_GENE_PHENO_SCORE') ~= nil"));
    }

    #[test]
    fn test_record_is_returned() {
        let expr = VariantExpression::compile("true").unwrap();
        let (keep, rec) = expr.matches(record()).unwrap();
        assert!(keep);
        assert_eq!(rec, record());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            VariantExpression::compile("variant.pos >"),
            Err(VariantStoreError::Expression(_))
        ));
        let expr = VariantExpression::compile("variant.pos").unwrap();
        assert!(expr.matches(record()).is_err());
        let expr = VariantExpression::compile("variant.nope == 1").unwrap();
        match expr.matches(record()) {
            Err(VariantStoreError::Expression(msg)) => assert!(msg.contains("variant has no field 'nope'")),
            other => panic!("unexpected result {:?}", other.map(|(keep, _)| keep)),
        }
    }
}
