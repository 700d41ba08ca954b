// ============================================
// Feature Assembler
// ============================================
// Joins request, user context and reference snapshots into one
// FeatureRecord per creative. All lookups are by composite `#`-joined key;
// a missing key leaves the sub-field zeroed.

pub mod extract;

pub use extract::{extract_model_features, ModelFeatures};

use std::collections::HashMap;

use crate::metrics::StageTimer;
use crate::models::{
    AdCounterFeatures, AdInfoFeatures, AdRequest, CounterBundle, FeatureContext, FeatureRecord,
    UserAdCounterFeatures, UserProfileFeatures,
};
use crate::services::snapshot::ReferenceSnapshot;
use crate::services::user_context::UserContext;

fn lookup(table: &HashMap<String, CounterBundle>, key: &str) -> CounterBundle {
    table.get(key).copied().unwrap_or_default()
}

/// Build one record per creative, in candidate-then-creative order.
pub fn assemble(
    request: &AdRequest,
    user: &UserContext,
    reference: &ReferenceSnapshot,
    req_time_ms: i64,
) -> Vec<FeatureRecord> {
    let _timer = StageTimer::start("feature_assemble");

    let user_id = request.user_id.as_str();
    let user_counters = &user.counters.store_user_counter;
    let ad_infos = &reference.ad_info.ad_infos;
    let ad_counters = &reference.ad_counter.store_ad_counter;

    let user_profile = UserProfileFeatures {
        user_id: user_id.to_string(),
        user_base: user.profile.user_base.clone().unwrap_or_default(),
        user_behavior: user.profile.user_behavior.clone().unwrap_or_default(),
        user_counter: lookup(user_counters, &format!("user_id#{}", user_id)),
    };

    let ctx = &request.contexts;
    let context = FeatureContext {
        pos_id: request.pos_id.clone(),
        network_type: ctx.network_type.clone(),
        os_version: ctx.os_version.clone(),
        brand: ctx.brand.clone(),
        model: ctx.model.clone(),
        language: ctx.language.clone(),
        app_version_code: ctx.app_version_code.clone(),
        app_name: ctx.package_name.clone(),
        client_ip: request.user_ip.clone(),
        req_time: req_time_ms,
    };
    let pos = context.pos_id.as_str();
    let pkg = context.app_name.as_str();

    let mut records = Vec::with_capacity(request.creative_count());

    for candidate in &request.creatives {
        let ad_id = candidate.camp_id;
        let app_id = candidate.app_id.as_str();
        let category = ad_infos
            .get(app_id)
            .map(|info| info.category.clone())
            .unwrap_or_default();
        let cat = category.as_str();
        let day_attr_install_cap = ad_infos
            .get(&format!("ad_id#{}", ad_id))
            .map(|info| info.day_attr_install_cap)
            .unwrap_or(0);

        let user_ad = UserAdCounterFeatures {
            user_id_ad_id: lookup(user_counters, &format!("user_id#ad_id#{}#{}", user_id, ad_id)),
            user_id_ad_package_name: lookup(
                user_counters,
                &format!("user_id#ad_package_name#{}#{}", user_id, app_id),
            ),
            user_id_ad_package_category: lookup(
                user_counters,
                &format!("user_id#ad_package_category#{}#{}", user_id, cat),
            ),
            user_id_pos_id_ad_id: lookup(
                user_counters,
                &format!("user_id#pos_id#ad_id#{}#{}#{}", user_id, pos, ad_id),
            ),
            user_id_pos_id_ad_package_name: lookup(
                user_counters,
                &format!("user_id#pos_id#ad_package_name#{}#{}#{}", user_id, pos, app_id),
            ),
            user_id_pos_id_ad_package_category: lookup(
                user_counters,
                &format!("user_id#pos_id#ad_package_category#{}#{}#{}", user_id, pos, cat),
            ),
            ..Default::default()
        };

        let ad_counter = AdCounterFeatures {
            ad_id: lookup(ad_counters, &format!("ad_id#{}", ad_id)),
            ad_package_name: lookup(
                ad_counters,
                &format!("package_name#ad_package_name#{}#{}", pkg, app_id),
            ),
            ad_package_category: lookup(
                ad_counters,
                &format!("package_name#ad_package_category#{}#{}", pkg, cat),
            ),
            pos_id_ad_id: lookup(ad_counters, &format!("pos_id#ad_id#{}#{}", pos, ad_id)),
            pos_id_ad_package_name: lookup(
                ad_counters,
                &format!("pos_id#ad_package_name#{}#{}", pos, app_id),
            ),
            pos_id_ad_package_category: lookup(
                ad_counters,
                &format!("pos_id#ad_package_category#{}#{}", pos, cat),
            ),
            ..Default::default()
        };

        for creative in &candidate.creative {
            let cid = creative.creative_id.as_str();
            let creative_create_time = ad_infos
                .get(&format!("c_id#{}", cid))
                .map(|info| info.creative_create_time)
                .unwrap_or(0);

            let mut record = FeatureRecord {
                context: context.clone(),
                user_profile: user_profile.clone(),
                ad_info: AdInfoFeatures {
                    ad_id,
                    app_id: app_id.to_string(),
                    category: category.clone(),
                    day_attr_install_cap,
                    attr_platform: candidate.attr_platform.clone(),
                    is_auto_download: candidate.is_auto_download,
                    bid_price: candidate.bid_price,
                    creative_id: cid.to_string(),
                    cp_id: creative.cp_id.clone(),
                    creative_create_time,
                },
                ad_counter: ad_counter.clone(),
                user_ad_counter: user_ad.clone(),
            };

            record.user_ad_counter.user_id_c_id =
                lookup(user_counters, &format!("user_id#c_id#{}#{}", user_id, cid));
            record.user_ad_counter.user_id_pos_id_c_id = lookup(
                user_counters,
                &format!("user_id#pos_id#c_id#{}#{}#{}", user_id, pos, cid),
            );
            record.ad_counter.c_id =
                lookup(ad_counters, &format!("package_name#c_id#{}#{}", pkg, cid));
            record.ad_counter.pos_id_c_id =
                lookup(ad_counters, &format!("pos_id#c_id#{}#{}", pos, cid));

            records.push(record);
        }
    }

    records
}
