use std::collections::HashMap;

use pharmacy_inventory::{AdjustmentKind, NewAdjustment, NewBatch};
use pharmacy_store::{AdjustmentFilter, BatchFilter};

use super::Context;
use crate::cli::{BatchCommands, BatchListArgs};
use crate::render;

pub fn run(ctx: &Context<'_>, command: BatchCommands) -> anyhow::Result<()> {
    match command {
        BatchCommands::Receive(args) => {
            let batch = ctx.store.receive_batch(NewBatch {
                drug_id: args.drug_id,
                lot_number: args.lot,
                quantity: args.quantity,
                unit_cost: args.cost,
                expiry_date: args.expiry,
                received_date: args.received.unwrap_or(ctx.today),
            })?;
            render::emit(ctx.format, &batch, render::batch)
        }
        BatchCommands::List(args) => {
            let batches = ctx.store.list_batches(&filter(ctx, &args))?;
            let names = ctx.drug_names()?;
            render::emit(ctx.format, &batches, |b| render::batches(b, &names))
        }
        BatchCommands::Adjust(args) => {
            let adjustment = ctx.store.adjust_batch(NewAdjustment {
                batch_id: args.batch_id,
                delta: args.delta,
                kind: AdjustmentKind::Manual,
                reason: args.reason,
            })?;
            render::emit(ctx.format, &adjustment, render::adjustment)
        }
        BatchCommands::WriteOff { id, reason } => {
            let adjustment = ctx.store.write_off_batch(id, &reason)?;
            render::emit(ctx.format, &adjustment, render::adjustment)
        }
        BatchCommands::Remove { id } => {
            ctx.store.remove_batch(id)?;
            render::emit(ctx.format, &serde_json::json!({ "removed": id }), |_| {
                render::message(&format!("Removed batch {id}"))
            })
        }
        BatchCommands::History(args) => {
            let history = ctx.store.list_adjustments(&AdjustmentFilter {
                batch_id: args.batch,
                drug_id: args.drug,
                from: args.from.map(|d| d.resolve(ctx.today)),
                to: args.to.map(|d| d.resolve(ctx.today)),
            })?;
            let names: HashMap<_, _> = ctx.drug_names()?;
            render::emit(ctx.format, &history, |h| render::adjustments(h, &names))
        }
    }
}

pub fn filter(ctx: &Context<'_>, args: &BatchListArgs) -> BatchFilter {
    BatchFilter {
        drug_id: args.drug,
        expiring_on_or_before: args.expiring_by.map(|d| d.resolve(ctx.today)),
        usable_on: args.usable.then_some(ctx.today),
        in_stock_only: args.in_stock,
    }
}
