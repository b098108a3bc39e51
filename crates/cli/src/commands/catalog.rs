use std::collections::HashMap;

use pharmacy_catalog::{DrugStatus, DrugUpdate, NewDrug};
use pharmacy_core::{DomainError, DrugId};
use pharmacy_store::{BatchFilter, DrugFilter, StockLevel};

use super::Context;
use crate::cli::{CategoryCommands, DrugCommands, DrugListArgs, DrugUpdateArgs, StatusArg};
use crate::render::{self, DrugDetail, DrugRow};

pub fn category(ctx: &Context<'_>, command: CategoryCommands) -> anyhow::Result<()> {
    match command {
        CategoryCommands::Add { name } => {
            let category = ctx.store.create_category(&name)?;
            render::emit(ctx.format, &category, render::category)
        }
        CategoryCommands::List => {
            let categories = ctx.store.list_categories()?;
            render::emit(ctx.format, &categories, |c| render::categories(c))
        }
        CategoryCommands::Rename { id, name } => {
            let category = ctx.store.rename_category(id, &name)?;
            render::emit(ctx.format, &category, render::category)
        }
        CategoryCommands::Delete { id } => {
            ctx.store.delete_category(id)?;
            render::emit(ctx.format, &serde_json::json!({ "deleted": id }), |_| {
                render::message(&format!("Deleted category {id}"))
            })
        }
    }
}

pub fn drug(ctx: &Context<'_>, command: DrugCommands) -> anyhow::Result<()> {
    match command {
        DrugCommands::Add(args) => {
            let drug = ctx.store.create_drug(NewDrug {
                name: args.name,
                category_id: args.category,
                unit_price: args.price,
                reorder_threshold: args.threshold,
                supplier: args.supplier,
            })?;
            render::emit(ctx.format, &drug, render::drug)
        }
        DrugCommands::List(args) => {
            let rows = list(ctx, &args)?;
            render::emit(ctx.format, &rows, |r| render::drug_rows(r))
        }
        DrugCommands::Show { id } => {
            let detail = show(ctx, id)?;
            render::emit(ctx.format, &detail, render::drug_detail)
        }
        DrugCommands::Update(args) => {
            let id = args.id;
            let drug = ctx.store.update_drug(id, update_from(args)?)?;
            render::emit(ctx.format, &drug, render::drug)
        }
        DrugCommands::Deactivate { id } => {
            let drug = ctx.store.deactivate_drug(id)?;
            render::emit(ctx.format, &drug, render::drug)
        }
        DrugCommands::Reactivate { id } => {
            let drug = ctx.store.reactivate_drug(id)?;
            render::emit(ctx.format, &drug, render::drug)
        }
    }
}

fn stock_by_drug(ctx: &Context<'_>) -> anyhow::Result<HashMap<DrugId, StockLevel>> {
    Ok(ctx
        .store
        .stock_levels(ctx.today)?
        .into_iter()
        .map(|level| (level.drug.id, level))
        .collect())
}

pub fn list(ctx: &Context<'_>, args: &DrugListArgs) -> anyhow::Result<Vec<DrugRow>> {
    let filter = DrugFilter {
        status: match args.status {
            StatusArg::Active => Some(DrugStatus::Active),
            StatusArg::Inactive => Some(DrugStatus::Inactive),
            StatusArg::All => None,
        },
        category_id: args.category,
        name_contains: args.name.clone(),
    };
    let stock = stock_by_drug(ctx)?;
    Ok(ctx
        .store
        .list_drugs(&filter)?
        .into_iter()
        .map(|drug| {
            let (on_hand, usable) = stock.get(&drug.id).map_or((0, 0), |s| (s.on_hand, s.usable));
            DrugRow { drug, on_hand, usable }
        })
        .collect())
}

pub fn show(ctx: &Context<'_>, id: DrugId) -> anyhow::Result<DrugDetail> {
    let drug = ctx.store.get_drug(id)?;
    let (on_hand, usable) = stock_by_drug(ctx)?
        .get(&id)
        .map_or((0, 0), |s| (s.on_hand, s.usable));
    let category = match drug.category_id {
        Some(category_id) => ctx
            .store
            .list_categories()?
            .into_iter()
            .find(|c| c.id == category_id)
            .map(|c| c.name),
        None => None,
    };
    let batches = ctx.store.list_batches(&BatchFilter::for_drug(id))?;
    Ok(DrugDetail {
        row: DrugRow { drug, on_hand, usable },
        category,
        batches,
    })
}

fn update_from(args: DrugUpdateArgs) -> Result<DrugUpdate, DomainError> {
    let update = DrugUpdate {
        name: args.name,
        category_id: if args.clear_category {
            Some(None)
        } else {
            args.category.map(Some)
        },
        unit_price: args.price,
        reorder_threshold: args.threshold,
        supplier: if args.clear_supplier {
            Some(None)
        } else {
            args.supplier.map(Some)
        },
    };
    if update.is_empty() {
        return Err(DomainError::validation("nothing to update; pass at least one field"));
    }
    Ok(update)
}
